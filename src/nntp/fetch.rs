//! Range fetch with per-article outcomes
//!
//! The fetch pass is an explicit bounded state machine (Fetching ->
//! ErrorCounting -> Reconnecting -> Fetching) rather than nested error
//! handlers, so the "3 consecutive transport errors" threshold and the
//! "advance the watermark regardless" rule are independently testable.
//!
//! A failed article is recorded and skipped, never retried within the pass;
//! the report's `highest_attempted` field is what the caller stores as the
//! new high watermark, so one permanently broken article can never wedge a
//! newsgroup.

use tracing::{debug, warn};

use crate::article::Article;
use crate::error::GateError;
use crate::error::Result;

use super::{NntpTransport, codes};

/// Per-article fetch outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArticleOutcome {
    /// Article fetched and parsed
    Success,
    /// Article number not present on the server (expired or cancelled)
    NotFound,
    /// Socket timeout
    Timeout,
    /// Connection-level failure
    ConnectionError,
    /// Server replied with an unexpected status
    ProtocolError,
}

/// One successfully fetched article with its number
#[derive(Debug, Clone)]
pub struct FetchedArticle {
    /// Article number within the group
    pub number: u64,
    /// Parsed article
    pub article: Article,
}

/// Result of one fetch pass over a range
#[derive(Debug, Default)]
pub struct FetchReport {
    /// Articles fetched, in increasing article-number order
    pub articles: Vec<FetchedArticle>,
    /// Failed article numbers with their outcomes, for logging only
    pub failed: Vec<(u64, ArticleOutcome)>,
    /// Highest article number attempted; the caller's new high watermark
    pub highest_attempted: u64,
}

/// Transport errors in a row before the single reconnect of the pass
const MAX_CONSECUTIVE_ERRORS: u32 = 3;

#[derive(Clone, Copy)]
enum FetchState {
    Fetching,
    /// Transport errors seen back-to-back
    ErrorCounting(u32),
    /// The one reconnect of this pass has been spent
    Reconnected,
}

impl NntpTransport {
    /// Fetch `from..=to` from a group, article by article
    ///
    /// Transport-level failures (timeout, connection error) count toward a
    /// consecutive-error threshold; at three the session reconnects once and
    /// resumes from the next unfetched article. Per-article protocol
    /// failures (missing article, bad status) are recorded and skipped
    /// without counting toward the threshold.
    pub async fn fetch_range(&mut self, group: &str, from: u64, to: u64) -> Result<FetchReport> {
        let mut report = FetchReport::default();
        if from > to {
            return Ok(report);
        }

        self.select_group(group).await?;
        let mut state = FetchState::Fetching;

        for number in from..=to {
            report.highest_attempted = number;

            match self.fetch_article(number).await {
                Ok(article) => {
                    debug!("fetched {}:{}", group, number);
                    report.articles.push(FetchedArticle { number, article });
                    state = match state {
                        FetchState::Reconnected => FetchState::Reconnected,
                        _ => FetchState::Fetching,
                    };
                }
                Err(e) => {
                    let outcome = classify(&e);
                    report.failed.push((number, outcome));

                    if outcome == ArticleOutcome::NotFound {
                        // An expired article is routine, not an error streak
                        continue;
                    }
                    warn!("article {}:{} failed: {} ({:?})", group, number, e, outcome);

                    if !matches!(
                        outcome,
                        ArticleOutcome::Timeout | ArticleOutcome::ConnectionError
                    ) {
                        continue;
                    }

                    state = match state {
                        FetchState::Fetching => FetchState::ErrorCounting(1),
                        FetchState::ErrorCounting(n) => FetchState::ErrorCounting(n + 1),
                        FetchState::Reconnected => FetchState::Reconnected,
                    };

                    if let FetchState::ErrorCounting(n) = state
                        && n >= MAX_CONSECUTIVE_ERRORS
                    {
                        warn!(
                            "{} consecutive transport errors in {}, reconnecting once",
                            n, group
                        );
                        match self.reconnect().await {
                            Ok(()) => {
                                // Re-select; failure here ends the pass, the
                                // watermark still covers what was attempted
                                if let Err(e) = self.select_group(group).await {
                                    warn!("group re-select after reconnect failed: {}", e);
                                    break;
                                }
                                state = FetchState::Reconnected;
                            }
                            Err(e) => {
                                warn!("reconnect failed, abandoning pass: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
        }

        debug!(
            "fetch pass {} [{}..={}]: {} fetched, {} failed",
            group,
            from,
            to,
            report.articles.len(),
            report.failed.len()
        );
        Ok(report)
    }
}

fn classify(error: &GateError) -> ArticleOutcome {
    match error {
        GateError::Timeout => ArticleOutcome::Timeout,
        GateError::Io(_) | GateError::ConnectionClosed => ArticleOutcome::ConnectionError,
        GateError::Protocol { code, .. }
            if *code == codes::NO_SUCH_ARTICLE_NUMBER || *code == codes::NO_SUCH_ARTICLE_ID =>
        {
            ArticleOutcome::NotFound
        }
        _ => ArticleOutcome::ProtocolError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_outcomes() {
        assert_eq!(classify(&GateError::Timeout), ArticleOutcome::Timeout);
        assert_eq!(
            classify(&GateError::ConnectionClosed),
            ArticleOutcome::ConnectionError
        );
        assert_eq!(
            classify(&GateError::Protocol {
                code: 423,
                message: "no such article".to_string()
            }),
            ArticleOutcome::NotFound
        );
        assert_eq!(
            classify(&GateError::Protocol {
                code: 500,
                message: "what".to_string()
            }),
            ArticleOutcome::ProtocolError
        );
    }
}
