//! Gateway orchestration
//!
//! One [`Gateway`] runs one phase at a time: import, export, process-held,
//! pack, areafix-only, maintenance, or check. Phases are bounded and
//! idempotent; the external scheduler decides cadence and the run lock
//! keeps two runs from overlapping.
//!
//! Error discipline: one bad packet or one bad article never aborts a
//! phase. Malformed inbound files move to bad/ (never deleted), failed
//! posts are counted and logged, and only configuration-level errors abort
//! the phase itself.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::areafix::{AreafixProcessor, NoServerAdmin, ServerAdmin, is_areafix};
use crate::areas::{AreaRouter, SubscriptionList};
use crate::article::{Article, Headers};
use crate::config::GateConfig;
use crate::error::{GateError, Result};
use crate::hold::{Direction, HeldMessage, HoldStore};
use crate::identity::{Translator, dedup_key};
use crate::nntp::{FetchReport, NntpTransport};
use crate::packet::{self, Packet, PacketMessage};
use crate::spam::{FilterInput, SpamFilter, Verdict};

/// Newsgroup fetch workers running at once during export
const MAX_CONCURRENT_FETCHES: usize = 4;

#[derive(Debug, Default, Clone, Copy)]
struct AreaStats {
    gated: u32,
    filtered: u32,
    held: u32,
    failed: u32,
}

/// The composed gateway
pub struct Gateway {
    config: GateConfig,
    router: AreaRouter,
    subscriptions: SubscriptionList,
    spam: SpamFilter,
    hold: HoldStore,
    translator: Translator,
    dry_run: bool,
    /// Messages waiting to be packed into outbound packets
    pending: Vec<PacketMessage>,
    /// Dedup keys committed to either network during this run
    seen: HashSet<String>,
    /// Lazily opened posting session for the import phase
    transport: Option<NntpTransport>,
    subscriptions_dirty: bool,
}

impl Gateway {
    /// Assemble a gateway from validated configuration
    pub fn new(config: GateConfig, dry_run: bool) -> Result<Self> {
        let subscriptions = SubscriptionList::load(&config.paths.areas_file)?;
        let router = AreaRouter::build(&config.remap, &subscriptions, config.hold.enabled);
        let spam = SpamFilter::compile(&config.spam);
        let hold = HoldStore::open(&config.paths.hold_dir)?;
        let translator = Translator::new(&config);
        Ok(Self {
            config,
            router,
            subscriptions,
            spam,
            hold,
            translator,
            dry_run,
            pending: Vec::new(),
            seen: HashSet::new(),
            transport: None,
            subscriptions_dirty: false,
        })
    }

    /// Access the hold store (admin console collaborator)
    pub fn hold_store(&self) -> &HoldStore {
        &self.hold
    }

    // ----- import ---------------------------------------------------------

    /// Import inbound packets and gate their messages to the news server
    pub async fn import(&mut self) -> Result<()> {
        info!("starting import");
        self.release_approved_to_nntp().await?;

        let inbound = self.config.paths.inbound_dir.clone();
        if !inbound.exists() {
            warn!("inbound directory {} does not exist", inbound.display());
            return Ok(());
        }

        let mut processed = 0usize;
        for path in packet_files(&inbound)? {
            match self.import_packet(&path).await {
                Ok(()) => {
                    self.file_done(&path, "processed")?;
                    processed += 1;
                }
                Err(e) if matches!(e, GateError::InvalidHeader(_) | GateError::TruncatedMessage(_)) => {
                    error!("malformed packet {}: {}", path.display(), e);
                    self.file_done(&path, "bad")?;
                }
                Err(e) => return Err(e),
            }
        }

        self.flush_outbound()?;
        self.disconnect().await;
        info!("import complete: {} packets processed", processed);
        Ok(())
    }

    async fn import_packet(&mut self, path: &Path) -> Result<()> {
        info!("processing packet {}", path.display());
        let bytes = fs::read(path)?;
        let decoded = packet::decode(&bytes)?;

        let expected = &self.config.fidonet.packet_password;
        if !expected.is_empty() && !decoded.password.eq_ignore_ascii_case(expected) {
            return Err(GateError::InvalidHeader(format!(
                "packet password mismatch in {}",
                path.display()
            )));
        }

        let mut stats: HashMap<String, AreaStats> = HashMap::new();
        let mut areafix_count = 0u32;
        let mut held_areas = Vec::new();

        for msg in &decoded.messages {
            if is_areafix(msg) {
                self.handle_areafix(msg);
                areafix_count += 1;
                continue;
            }
            let area = msg.area.clone().unwrap_or_default();
            if area.is_empty() {
                // Plain netmail is not gated
                debug!("skipping netmail for {:?}", msg.to_name);
                continue;
            }
            let outcome = self.gate_to_nntp(msg, &area).await;
            let entry = stats.entry(area.clone()).or_default();
            match outcome {
                GateOutcome::Gated => entry.gated += 1,
                GateOutcome::Filtered => entry.filtered += 1,
                GateOutcome::Held => {
                    entry.held += 1;
                    held_areas.push(area);
                }
                GateOutcome::Failed => entry.failed += 1,
            }
        }

        for (area, s) in &stats {
            info!(
                "area {}: {} gated, {} filtered, {} held, {} failed",
                area, s.gated, s.filtered, s.held, s.failed
            );
        }
        if areafix_count > 0 {
            info!("areafix: {} requests processed", areafix_count);
        }
        self.queue_hold_notification(&held_areas)?;
        Ok(())
    }

    async fn gate_to_nntp(&mut self, msg: &PacketMessage, area: &str) -> GateOutcome {
        let Some(newsgroup) = self.router.newsgroup_for(area) else {
            warn!("no newsgroup mapping for area {}", area);
            return GateOutcome::Failed;
        };

        let groups = vec![newsgroup.clone()];
        let headers = BTreeMap::new();
        let verdict = self.spam.evaluate(
            &FilterInput {
                from: &msg.from_name,
                subject: &msg.subject,
                groups: &groups,
                headers: &headers,
            },
            &msg.body_text(),
        );
        if let Verdict::Blocked { rule } = verdict {
            info!("message blocked by {}: {:?}", rule, msg.subject);
            return GateOutcome::Filtered;
        }

        let article = self.translator.to_article(msg, &newsgroup, Utc::now());

        if self.router.should_hold(area) {
            if self.dry_run {
                info!("dry-run: would hold message {:?} in {}", msg.subject, area);
                return GateOutcome::Held;
            }
            match self.hold_article(&article, Direction::ToNntp, area) {
                Ok(id) => {
                    info!("message held for review: {}", id);
                    return GateOutcome::Held;
                }
                Err(e) => {
                    error!("failed to hold message: {}", e);
                    return GateOutcome::Failed;
                }
            }
        }

        self.post_article(&article).await
    }

    async fn post_article(&mut self, article: &Article) -> GateOutcome {
        // Dedup is enforced before the commit; a duplicate found after
        // posting cannot be un-posted
        if !self.seen.insert(dedup_key(&article.headers.message_id)) {
            info!("duplicate suppressed: {}", article.headers.message_id);
            return GateOutcome::Filtered;
        }

        if self.dry_run {
            info!(
                "dry-run: would post {} to {}",
                article.headers.message_id,
                article.headers.newsgroups.join(",")
            );
            return GateOutcome::Gated;
        }

        for attempt in 0..2 {
            let transport = match self.ensure_transport().await {
                Ok(t) => t,
                Err(e) => {
                    error!("cannot reach news server: {}", e);
                    return GateOutcome::Failed;
                }
            };
            match transport.post(article).await {
                Ok(()) => return GateOutcome::Gated,
                Err(e) if e.is_transient() && attempt == 0 => {
                    warn!("post failed ({}), reconnecting once", e);
                    self.transport = None;
                }
                Err(e) => {
                    error!("post of {} failed: {}", article.headers.message_id, e);
                    return GateOutcome::Failed;
                }
            }
        }
        GateOutcome::Failed
    }

    async fn ensure_transport(&mut self) -> Result<&mut NntpTransport> {
        if self.transport.is_none() {
            let config = Arc::new(self.config.nntp.clone());
            self.transport = Some(NntpTransport::connect(config).await?);
        }
        Ok(self.transport.as_mut().expect("transport just set"))
    }

    async fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            let _ = transport.quit().await;
        }
    }

    // ----- areafix --------------------------------------------------------

    fn handle_areafix(&mut self, msg: &PacketMessage) {
        let admin: &dyn ServerAdmin = &NoServerAdmin;
        let mut processor =
            AreafixProcessor::new(&self.config, &self.router, &mut self.subscriptions, admin);
        let outcome = processor.process(msg);

        if outcome.changes > 0 {
            self.subscriptions_dirty = true;
        }
        if let Some(reply) = outcome.reply {
            let mut netmail = self.translator.netmail(
                &msg.from_name,
                msg.orig_net,
                msg.orig_node,
                "Areafix response",
                &reply,
                Utc::now(),
            );
            netmail.from_name = "Areafix".to_string();
            if let Some(msgid) = msg.msgid() {
                netmail.set_kludge("REPLY", msgid);
            }
            self.pending.push(netmail);
        }
    }

    /// Process only areafix requests from inbound packets
    ///
    /// A packet containing nothing but areafix requests moves to processed;
    /// mixed packets stay in inbound for the next import cycle.
    pub fn areafix_only(&mut self) -> Result<()> {
        info!("starting areafix-only pass");
        let inbound = self.config.paths.inbound_dir.clone();
        if !inbound.exists() {
            warn!("inbound directory {} does not exist", inbound.display());
            return Ok(());
        }

        for path in packet_files(&inbound)? {
            let decoded = match fs::read(&path).map_err(GateError::from).and_then(|b| packet::decode(&b)) {
                Ok(p) => p,
                Err(e) => {
                    error!("malformed packet {}: {}", path.display(), e);
                    self.file_done(&path, "bad")?;
                    continue;
                }
            };

            let mut other = 0;
            for msg in &decoded.messages {
                if is_areafix(msg) {
                    self.handle_areafix(msg);
                } else {
                    other += 1;
                }
            }
            if other == 0 {
                self.file_done(&path, "processed")?;
            } else {
                info!(
                    "{} has {} non-areafix messages, leaving for import",
                    path.display(),
                    other
                );
            }
        }

        self.flush_outbound()
    }

    // ----- export ---------------------------------------------------------

    /// Fetch new articles from subscribed groups and pack them for FidoNet
    pub async fn export(&mut self) -> Result<()> {
        info!("starting export");
        self.release_approved_to_fido()?;

        if self.subscriptions.is_empty() {
            info!("no subscribed groups, nothing to export");
            self.flush_outbound()?;
            return Ok(());
        }

        let plan: Vec<(String, u64, bool)> = self
            .subscriptions
            .iter()
            .map(|s| (s.newsgroup.clone(), s.watermark.high, s.watermark.high == 0))
            .collect();

        // Independent worker tasks, each with its own session; no session
        // object crosses a task boundary
        let nntp = Arc::new(self.config.nntp.clone());
        let initial_fetch = self.config.spam.initial_fetch;
        let fetch_limit = self.config.spam.fetch_limit;

        let mut reports: Vec<(String, FetchReport)> = Vec::new();
        for wave in plan.chunks(MAX_CONCURRENT_FETCHES) {
            let mut tasks: JoinSet<(String, Result<FetchReport>)> = JoinSet::new();
            for (group, high, is_new) in wave.iter().cloned() {
                let nntp = Arc::clone(&nntp);
                let limit = if is_new { initial_fetch } else { fetch_limit };
                tasks.spawn(async move {
                    let report = fetch_group(nntp, &group, high, limit).await;
                    (group, report)
                });
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((group, Ok(report))) => reports.push((group, report)),
                    Ok((group, Err(e))) => error!("export of {} failed: {}", group, e),
                    Err(e) => error!("fetch worker panicked: {}", e),
                }
            }
        }

        let mut held_areas = Vec::new();
        for (group, report) in reports {
            let area = self.router.area_for(&group);
            let mut stats = AreaStats::default();

            for fetched in &report.articles {
                match self.gate_to_fido(&fetched.article, &area) {
                    GateOutcome::Gated => stats.gated += 1,
                    GateOutcome::Filtered => stats.filtered += 1,
                    GateOutcome::Held => {
                        stats.held += 1;
                        held_areas.push(area.clone());
                    }
                    GateOutcome::Failed => stats.failed += 1,
                }
            }
            for (number, outcome) in &report.failed {
                warn!("article {}:{} not exported: {:?}", group, number, outcome);
            }

            // The high watermark covers every attempted article, failed ones
            // included, so a broken article cannot wedge the group
            if report.highest_attempted > 0 {
                self.subscriptions.advance(&group, report.highest_attempted);
                self.subscriptions_dirty = true;
            }

            if stats.gated + stats.filtered + stats.held + stats.failed > 0 {
                info!(
                    "area {}: {} exported, {} filtered, {} held, {} failed",
                    area, stats.gated, stats.filtered, stats.held, stats.failed
                );
            } else {
                info!("area {}: no new messages", area);
            }
        }

        self.queue_hold_notification(&held_areas)?;
        self.flush_outbound()?;
        info!("export complete");
        Ok(())
    }

    fn gate_to_fido(&mut self, article: &Article, area: &str) -> GateOutcome {
        // Loop check: never export what this gateway posted
        if article
            .headers
            .extra_header("x-gateway")
            .is_some_and(|tag| tag == self.translator.gateway_tag())
        {
            debug!("skipping own article {}", article.headers.message_id);
            return GateOutcome::Filtered;
        }

        let mut headers = article.headers.extra.clone();
        if let Some(path) = &article.headers.path {
            headers.insert("path".to_string(), path.clone());
        }
        if let Some(organization) = &article.headers.organization {
            headers.insert("organization".to_string(), organization.clone());
        }
        if let Some(content_type) = &article.headers.content_type {
            headers.insert("content-type".to_string(), content_type.clone());
        }
        let verdict = self.spam.evaluate(
            &FilterInput {
                from: &article.headers.from,
                subject: &article.headers.subject,
                groups: &article.headers.newsgroups,
                headers: &headers,
            },
            &article.body,
        );
        if let Verdict::Blocked { rule } = verdict {
            info!("article blocked by {}: {:?}", rule, article.headers.subject);
            return GateOutcome::Filtered;
        }

        if self.router.should_hold(area) {
            if self.dry_run {
                info!(
                    "dry-run: would hold article {} in {}",
                    article.headers.message_id, area
                );
                return GateOutcome::Held;
            }
            return match self.hold_article(article, Direction::ToFidonet, area) {
                Ok(id) => {
                    info!("article held for review: {}", id);
                    GateOutcome::Held
                }
                Err(e) => {
                    error!("failed to hold article: {}", e);
                    GateOutcome::Failed
                }
            };
        }

        self.commit_to_fido(article, area)
    }

    fn commit_to_fido(&mut self, article: &Article, area: &str) -> GateOutcome {
        let msg = self.translator.to_packet_message(article, area, Utc::now());
        let key = dedup_key(&article.headers.message_id);
        if !key.is_empty() && !self.seen.insert(key) {
            info!("duplicate suppressed: {}", article.headers.message_id);
            return GateOutcome::Filtered;
        }
        if self.dry_run {
            info!(
                "dry-run: would pack {} into area {}",
                article.headers.message_id, area
            );
            return GateOutcome::Gated;
        }
        self.pending.push(msg);
        GateOutcome::Gated
    }

    // ----- hold -----------------------------------------------------------

    fn hold_article(&self, article: &Article, direction: Direction, area: &str) -> Result<String> {
        let record = HeldMessage::new(
            direction,
            area,
            &article.headers.from,
            &article.headers.subject,
            &article.headers.message_id,
            headers_to_map(&article.headers),
            article.body.clone(),
            Utc::now(),
        );
        self.hold.hold(record)
    }

    /// Post approved FidoNet-origin messages to the news server
    async fn release_approved_to_nntp(&mut self) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        let released = self.hold.take_approved(Direction::ToNntp)?;
        for record in released {
            let article = article_from_held(&record);
            match self.post_article(&article).await {
                GateOutcome::Gated => info!("posted approved message {}", record.id),
                _ => error!("failed to post approved message {}", record.id),
            }
        }
        Ok(())
    }

    /// Queue approved news-origin messages for FidoNet packing
    fn release_approved_to_fido(&mut self) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        let released = self.hold.take_approved(Direction::ToFidonet)?;
        for record in released {
            let article = article_from_held(&record);
            match self.commit_to_fido(&article, &record.area) {
                GateOutcome::Gated => info!("queued approved message {} for packing", record.id),
                _ => error!("approved message {} was not queued", record.id),
            }
        }
        Ok(())
    }

    /// Process approved held messages in both directions, then pack
    pub async fn process_held(&mut self) -> Result<()> {
        info!("processing approved held messages");
        self.release_approved_to_nntp().await?;
        self.release_approved_to_fido()?;
        self.flush_outbound()?;
        self.disconnect().await;
        Ok(())
    }

    fn queue_hold_notification(&mut self, held_areas: &[String]) -> Result<()> {
        if held_areas.is_empty() || !self.config.hold.notify_sysop || self.dry_run {
            return Ok(());
        }
        let Some(areas) = self.hold.notify_if_due(held_areas, Utc::now())? else {
            return Ok(());
        };

        let pending_count = self.hold.list_pending(None)?.len();
        let body = format!(
            "{} message(s) are held for review in: {}\n\n\
             These messages require approval before being gated between\n\
             the news server and FidoNet. Use the review tooling to approve\n\
             or reject them.\n\n\
             ---\n{}",
            pending_count,
            areas.join(", "),
            self.config.origin_text()
        );
        let linked = self.translator.linked_address();
        let netmail = self.translator.netmail(
            &self.config.gateway.sysop.clone(),
            linked.net,
            linked.node,
            &format!("Messages held for review ({} areas)", areas.len()),
            &body,
            Utc::now(),
        );
        self.pending.push(netmail);
        info!("queued hold notification for {} area(s)", areas.len());
        Ok(())
    }

    // ----- pack -----------------------------------------------------------

    /// Pack pending messages into outbound packet files
    pub fn pack(&mut self) -> Result<()> {
        self.flush_outbound()
    }

    fn flush_outbound(&mut self) -> Result<()> {
        if self.subscriptions_dirty && !self.dry_run {
            self.subscriptions.save()?;
            self.subscriptions_dirty = false;
        }
        if self.pending.is_empty() {
            debug!("no messages to pack");
            return Ok(());
        }
        if self.dry_run {
            info!("dry-run: would pack {} messages", self.pending.len());
            self.pending.clear();
            return Ok(());
        }

        let outbound = &self.config.paths.outbound_dir;
        fs::create_dir_all(outbound)?;

        let packet = Packet {
            orig: self.config.fidonet.gateway_address,
            dest: self.config.fidonet.linked_address,
            password: self.config.fidonet.packet_password.clone(),
            created: Utc::now().naive_utc(),
            messages: std::mem::take(&mut self.pending),
        };
        let count = packet.messages.len();
        let bytes = packet::encode(&packet);

        let path = next_packet_path(outbound)?;
        fs::write(&path, bytes)?;
        info!("created packet {} with {} messages", path.display(), count);
        Ok(())
    }

    // ----- maintenance / check -------------------------------------------

    /// Expire old processed packets and hold records
    pub fn maintenance(&self) -> Result<()> {
        info!("running maintenance");
        if self.dry_run {
            info!("dry-run: skipping maintenance deletions");
            return Ok(());
        }
        let retention_days = self.config.hold.retention_days;
        let processed = self.config.paths.inbound_dir.join("processed");
        let mut removed = 0;
        if processed.exists() {
            let cutoff = std::time::SystemTime::now()
                - std::time::Duration::from_secs(u64::from(retention_days) * 86_400);
            for path in packet_files(&processed)? {
                let old = fs::metadata(&path)
                    .and_then(|m| m.modified())
                    .map(|t| t < cutoff)
                    .unwrap_or(false);
                if old {
                    fs::remove_file(&path)?;
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            info!("removed {} old processed packets", removed);
        }
        self.hold.cleanup(retention_days, Utc::now())?;
        Ok(())
    }

    /// Validate configuration and directory layout; with network access,
    /// prove the news server is reachable. No writes.
    pub async fn check(&self) -> Result<()> {
        self.config.validate()?;

        for (name, path) in [
            ("inbound", &self.config.paths.inbound_dir),
            ("outbound", &self.config.paths.outbound_dir),
            ("hold", &self.config.paths.hold_dir),
        ] {
            if path.exists() {
                info!("{} directory: {}", name, path.display());
            } else {
                warn!("{} directory {} does not exist", name, path.display());
            }
        }
        info!(
            "{} subscriptions, {} mapped areas",
            self.subscriptions.len(),
            self.router.mappings().len()
        );

        if self.dry_run {
            info!("dry-run: skipping connection test");
            return Ok(());
        }
        let config = Arc::new(self.config.nntp.clone());
        let mut transport = NntpTransport::connect(config).await?;
        info!("news server connection test passed");
        let _ = transport.quit().await;
        Ok(())
    }

    fn file_done(&self, path: &Path, sub: &str) -> Result<()> {
        if self.dry_run {
            info!("dry-run: would move {} to {}/", path.display(), sub);
            return Ok(());
        }
        let dir = self.config.paths.inbound_dir.join(sub);
        fs::create_dir_all(&dir)?;
        let dest = dir.join(path.file_name().unwrap_or_default());
        fs::rename(path, &dest)?;
        debug!("moved {} to {}", path.display(), dest.display());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateOutcome {
    Gated,
    Filtered,
    Held,
    Failed,
}

/// One group's fetch, on its own session
async fn fetch_group(
    nntp: Arc<crate::config::NntpConfig>,
    group: &str,
    stored_high: u64,
    limit: u64,
) -> Result<FetchReport> {
    let mut transport = NntpTransport::connect(nntp).await?;
    let status = transport.select_group(group).await?;

    let start = stored_high.saturating_add(1).max(status.first);
    if start > status.last {
        let _ = transport.quit().await;
        return Ok(FetchReport::default());
    }
    let end = status.last.min(start + limit.saturating_sub(1));

    let report = transport.fetch_range(group, start, end).await;
    let _ = transport.quit().await;
    report
}

/// Sorted *.pkt files directly inside a directory
fn packet_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("pkt"))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// 8.3 hex-timestamp packet name, bumped on collision
fn next_packet_path(outbound: &Path) -> Result<PathBuf> {
    let mut stamp = Utc::now().timestamp() as u64;
    loop {
        let path = outbound.join(format!("{:08x}.pkt", stamp & 0xFFFF_FFFF));
        if !path.exists() {
            return Ok(path);
        }
        stamp += 1;
    }
}

/// Flatten article headers into the held-record map
fn headers_to_map(headers: &Headers) -> BTreeMap<String, String> {
    let mut map = headers.extra.clone();
    map.insert("from".to_string(), headers.from.clone());
    map.insert("newsgroups".to_string(), headers.newsgroups.join(","));
    map.insert("subject".to_string(), headers.subject.clone());
    map.insert("date".to_string(), headers.date.clone());
    map.insert("message-id".to_string(), headers.message_id.clone());
    if let Some(refs) = &headers.references {
        map.insert("references".to_string(), refs.join(" "));
    }
    if let Some(v) = &headers.organization {
        map.insert("organization".to_string(), v.clone());
    }
    if let Some(v) = &headers.sender {
        map.insert("sender".to_string(), v.clone());
    }
    if let Some(v) = &headers.path {
        map.insert("path".to_string(), v.clone());
    }
    if let Some(v) = &headers.content_type {
        map.insert("content-type".to_string(), v.clone());
    }
    map
}

/// Rebuild an article from a held record
fn article_from_held(record: &HeldMessage) -> Article {
    let mut map = record.headers.clone();
    let mut take = |name: &str| map.remove(name);
    let headers = Headers {
        from: take("from").unwrap_or_else(|| record.from.clone()),
        newsgroups: take("newsgroups")
            .map(|v| crate::article::parse_comma_list(&v))
            .unwrap_or_default(),
        subject: take("subject").unwrap_or_else(|| record.subject.clone()),
        date: take("date").unwrap_or_default(),
        message_id: take("message-id").unwrap_or_else(|| record.message_id.clone()),
        references: take("references").map(|v| crate::article::parse_message_id_list(&v)),
        organization: take("organization"),
        sender: take("sender"),
        path: take("path"),
        content_type: take("content-type"),
        extra: map,
    };
    Article {
        headers,
        body: record.body.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Kludge;
    use tempfile::TempDir;

    fn test_gateway(dir: &TempDir, extra_toml: &str) -> Gateway {
        let root = dir.path();
        let toml_text = format!(
            r#"
                [gateway]
                name = "ftn-gate"
                origin_line = "Test Gate"
                sysop = "Test Sysop"
                domain = "gate.example.org"
                gate_email = "gate@gate.example.org"
                client_mode = true
                phase_timeout_secs = 600

                [fidonet]
                gateway_address = "2:292/854"
                linked_address = "2:292/8"
                packet_password = "pw"
                areafix_password = "sekrit"

                [nntp]
                host = "news.invalid"

                [paths]
                inbound_dir = "{root}/inbound"
                outbound_dir = "{root}/outbound"
                areas_file = "{root}/areas.cfg"
                hold_dir = "{root}/hold"

                {extra}
            "#,
            root = root.display(),
            extra = extra_toml,
        );
        let config: GateConfig = toml::from_str(&toml_text).unwrap();
        fs::create_dir_all(root.join("inbound")).unwrap();
        fs::create_dir_all(root.join("outbound")).unwrap();
        fs::write(root.join("areas.cfg"), "alt.bbs.test: 0-10\n").unwrap();
        Gateway::new(config, false).unwrap()
    }

    fn echomail(area: &str, subject: &str, body: &[&str]) -> PacketMessage {
        let mut msg = PacketMessage {
            from_name: "Remote User".to_string(),
            to_name: "All".to_string(),
            subject: subject.to_string(),
            date: "07 Aug 26  10:00:00".to_string(),
            orig_net: 292,
            orig_node: 8,
            dest_net: 292,
            dest_node: 854,
            area: Some(area.to_string()),
            body: body.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        msg.set_kludge("MSGID", "2:292/8 0badcafe");
        msg
    }

    fn write_packet(gateway: &Gateway, messages: Vec<PacketMessage>) -> PathBuf {
        let packet = Packet {
            orig: "2:292/8".parse().unwrap(),
            dest: "2:292/854".parse().unwrap(),
            password: "pw".to_string(),
            created: Utc::now().naive_utc(),
            messages,
        };
        let path = gateway.config.paths.inbound_dir.join("00000001.pkt");
        fs::write(&path, packet::encode(&packet)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_malformed_packet_is_quarantined() {
        let dir = TempDir::new().unwrap();
        let mut gateway = test_gateway(&dir, "");
        let path = gateway.config.paths.inbound_dir.join("broken.pkt");
        fs::write(&path, b"not a packet at all").unwrap();

        gateway.import().await.unwrap();

        assert!(!path.exists());
        assert!(gateway
            .config
            .paths
            .inbound_dir
            .join("bad")
            .join("broken.pkt")
            .exists());
    }

    #[tokio::test]
    async fn test_password_mismatch_quarantines() {
        let dir = TempDir::new().unwrap();
        let mut gateway = test_gateway(&dir, "");
        let packet = Packet {
            orig: "2:292/8".parse().unwrap(),
            dest: "2:292/854".parse().unwrap(),
            password: "WRONG".to_string(),
            created: Utc::now().naive_utc(),
            messages: vec![],
        };
        let path = gateway.config.paths.inbound_dir.join("badpw.pkt");
        fs::write(&path, packet::encode(&packet)).unwrap();

        gateway.import().await.unwrap();
        assert!(gateway
            .config
            .paths
            .inbound_dir
            .join("bad")
            .join("badpw.pkt")
            .exists());
    }

    #[tokio::test]
    async fn test_spam_blocked_before_translation_inbound() {
        let dir = TempDir::new().unwrap();
        let mut gateway = test_gateway(
            &dir,
            "[[remap]]\narea = \"FIDOTEST\"\nnewsgroup = \"alt.bbs.test\"\n",
        );
        let msg = echomail("FIDOTEST", "MAKE MONEY FAST", &["buy now"]);
        write_packet(&gateway, vec![msg]);

        // Never touches the network: the filter fires before translation
        gateway.import().await.unwrap();
        assert!(gateway.hold.list_pending(None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hold_policy_intercepts_inbound() {
        let dir = TempDir::new().unwrap();
        let mut gateway = test_gateway(
            &dir,
            "[hold]\nenabled = true\n\n[[remap]]\narea = \"FIDOTEST\"\nnewsgroup = \"alt.bbs.test\"\nhold = true\n",
        );
        let msg = echomail("FIDOTEST", "needs review", &["hello there"]);
        write_packet(&gateway, vec![msg]);

        gateway.import().await.unwrap();

        let pending = gateway.hold.list_pending(Some("FIDOTEST")).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].direction, Direction::ToNntp);
        assert_eq!(pending[0].subject, "needs review");
        // The packet itself was processed
        assert!(gateway
            .config
            .paths
            .inbound_dir
            .join("processed")
            .join("00000001.pkt")
            .exists());
    }

    #[tokio::test]
    async fn test_areafix_request_produces_reply_packet() {
        let dir = TempDir::new().unwrap();
        let mut gateway = test_gateway(&dir, "");
        let mut request = PacketMessage {
            from_name: "Remote Sysop".to_string(),
            to_name: "Areafix".to_string(),
            subject: "sekrit".to_string(),
            orig_net: 292,
            orig_node: 8,
            dest_net: 292,
            dest_node: 854,
            body: vec!["+alt.new.area".to_string()],
            ..Default::default()
        };
        request.set_kludge("MSGID", "2:292/8 11112222");
        write_packet(&gateway, vec![request]);

        gateway.import().await.unwrap();

        // Subscription applied and saved
        assert!(gateway.subscriptions.contains("alt.new.area"));
        let saved = fs::read_to_string(gateway.config.paths.areas_file.clone()).unwrap();
        assert!(saved.contains("alt.new.area: 0-0"));

        // Reply netmail packed to outbound, threaded to the request
        let outbound = packet_files(&gateway.config.paths.outbound_dir).unwrap();
        assert_eq!(outbound.len(), 1);
        let reply = packet::decode(&fs::read(&outbound[0]).unwrap()).unwrap();
        assert_eq!(reply.messages.len(), 1);
        let netmail = &reply.messages[0];
        assert!(netmail.is_netmail());
        assert_eq!(netmail.from_name, "Areafix");
        assert_eq!(netmail.to_name, "Remote Sysop");
        assert_eq!(netmail.dest_net, 292);
        assert_eq!(netmail.dest_node, 8);
        assert_eq!(netmail.kludge("REPLY"), Some("2:292/8 11112222"));
        assert!(netmail.body_text().contains("+ alt.new.area: ADDED"));
    }

    #[tokio::test]
    async fn test_wildcard_areafix_applies_nothing() {
        let dir = TempDir::new().unwrap();
        let mut gateway = test_gateway(&dir, "");
        let before = gateway.subscriptions.len();
        let request = PacketMessage {
            from_name: "Prober".to_string(),
            to_name: "AREAMGR".to_string(),
            subject: "sekrit".to_string(),
            orig_net: 292,
            orig_node: 8,
            body: vec!["*".to_string()],
            ..Default::default()
        };
        write_packet(&gateway, vec![request]);

        gateway.import().await.unwrap();
        assert_eq!(gateway.subscriptions.len(), before);

        let outbound = packet_files(&gateway.config.paths.outbound_dir).unwrap();
        let reply = packet::decode(&fs::read(&outbound[0]).unwrap()).unwrap();
        assert!(reply.messages[0].body_text().contains("REQUEST BLOCKED"));
    }

    #[tokio::test]
    async fn test_approved_held_article_is_packed_on_release() {
        let dir = TempDir::new().unwrap();
        let mut gateway = test_gateway(&dir, "");

        let article = Article {
            headers: Headers {
                from: "User <user@example.com>".to_string(),
                newsgroups: vec!["alt.bbs.test".to_string()],
                subject: "held then approved".to_string(),
                date: "Fri, 07 Aug 2026 10:00:00 +0000".to_string(),
                message_id: "<approved@example.com>".to_string(),
                ..Default::default()
            },
            body: "body line".to_string(),
        };
        let id = gateway
            .hold_article(&article, Direction::ToFidonet, "ALT.BBS.TEST")
            .unwrap();
        gateway
            .hold
            .resolve(&id, crate::hold::Resolution::Approved, "sysop", None)
            .unwrap();

        gateway.release_approved_to_fido().unwrap();
        gateway.pack().unwrap();

        let outbound = packet_files(&gateway.config.paths.outbound_dir).unwrap();
        assert_eq!(outbound.len(), 1);
        let packed = packet::decode(&fs::read(&outbound[0]).unwrap()).unwrap();
        assert_eq!(packed.messages.len(), 1);
        assert_eq!(packed.messages[0].area.as_deref(), Some("ALT.BBS.TEST"));
        assert_eq!(
            packed.messages[0].kludge("MSGID").map(|m| m.contains("approved@example.com")),
            Some(true)
        );
    }

    #[test]
    fn test_dedup_suppresses_second_commit() {
        let dir = TempDir::new().unwrap();
        let mut gateway = test_gateway(&dir, "");
        let article = Article {
            headers: Headers {
                from: "u@example.com".to_string(),
                newsgroups: vec!["alt.bbs.test".to_string()],
                subject: "x".to_string(),
                message_id: "<dup@example.com>".to_string(),
                ..Default::default()
            },
            body: String::new(),
        };
        assert_eq!(gateway.commit_to_fido(&article, "ALT.BBS.TEST"), GateOutcome::Gated);
        assert_eq!(
            gateway.commit_to_fido(&article, "ALT.BBS.TEST"),
            GateOutcome::Filtered
        );
        assert_eq!(gateway.pending.len(), 1);
    }

    #[test]
    fn test_own_articles_are_not_exported() {
        let dir = TempDir::new().unwrap();
        let mut gateway = test_gateway(&dir, "");
        let mut article = Article {
            headers: Headers {
                from: "u@example.com".to_string(),
                newsgroups: vec!["alt.bbs.test".to_string()],
                subject: "mine".to_string(),
                message_id: "<mine@gate.example.org>".to_string(),
                ..Default::default()
            },
            body: String::new(),
        };
        article
            .headers
            .extra
            .insert("x-gateway".to_string(), gateway.translator.gateway_tag());
        assert_eq!(
            gateway.gate_to_fido(&article, "ALT.BBS.TEST"),
            GateOutcome::Filtered
        );
        assert!(gateway.pending.is_empty());
    }

    #[test]
    fn test_held_record_round_trips_article() {
        let mut extra = BTreeMap::new();
        extra.insert("x-ftn-msgid".to_string(), "2:292/8 0badcafe".to_string());
        let article = Article {
            headers: Headers {
                from: "User <user@example.com>".to_string(),
                newsgroups: vec!["alt.bbs.test".to_string()],
                subject: "subj".to_string(),
                date: "Fri, 07 Aug 2026 10:00:00 +0000".to_string(),
                message_id: "<roundtrip@example.com>".to_string(),
                references: Some(vec!["<parent@example.com>".to_string()]),
                content_type: Some("text/plain; charset=utf-8".to_string()),
                extra,
                ..Default::default()
            },
            body: "the body".to_string(),
        };
        let record = HeldMessage::new(
            Direction::ToFidonet,
            "ALT.BBS.TEST",
            &article.headers.from,
            &article.headers.subject,
            &article.headers.message_id,
            headers_to_map(&article.headers),
            article.body.clone(),
            Utc::now(),
        );
        let rebuilt = article_from_held(&record);
        assert_eq!(rebuilt.headers.from, article.headers.from);
        assert_eq!(rebuilt.headers.message_id, article.headers.message_id);
        assert_eq!(rebuilt.headers.references, article.headers.references);
        assert_eq!(
            rebuilt.headers.extra_header("x-ftn-msgid"),
            Some("2:292/8 0badcafe")
        );
        assert_eq!(rebuilt.body, article.body);
    }

    #[test]
    fn test_kludges_survive_gateway_translation() {
        // Unknown kludges from the wire are preserved on the packet message
        let msg = PacketMessage {
            kludges: vec![Kludge {
                key: "FLAGS".to_string(),
                value: "NPD".to_string(),
            }],
            ..Default::default()
        };
        assert_eq!(msg.kludge("FLAGS"), Some("NPD"));
    }
}
