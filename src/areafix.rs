//! Areafix: remote subscription management over netmail
//!
//! A request is a netmail addressed to AREAFIX or AREAMGR whose subject is
//! the per-link password. Processing runs through two gates before any
//! command executes: the password gate (failure is a silent drop logged as
//! an authentication failure, no information leaks back) and the protection
//! gate (bare wildcard subscriptions and oversized batches reject the whole
//! request with zero changes applied). Only then are commands applied in
//! order, and a single reply netmail reports every outcome.

use tracing::{info, warn};

use crate::areas::{AreaRouter, SubscriptionList};
use crate::config::GateConfig;
use crate::error::Result;
use crate::packet::PacketMessage;

/// One parsed areafix command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `+area` or a bare area tag
    Subscribe(String),
    /// `-area`
    Unsubscribe(String),
    /// `QUERY [pattern]` / `? [pattern]`: search known groups
    Query(Option<String>),
    /// `LIST` / `%LIST`: subscribed groups
    List,
    /// `HELP` / `%HELP`
    Help,
}

/// Protection gate rejection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Protection {
    /// A command was exactly a wildcard token
    Wildcard(String),
    /// Too many subscribe/unsubscribe commands in one request
    TooMany {
        /// Commands counted
        count: usize,
        /// Configured ceiling
        limit: usize,
    },
}

/// Newsgroup create/remove seam toward the news server's admin interface
///
/// Full-gateway mode wires this to the server control channel; client-only
/// mode uses [`NoServerAdmin`] and touches only the local subscription list.
pub trait ServerAdmin {
    /// Create a newsgroup on the server
    fn create_group(&self, group: &str) -> Result<()>;
    /// Remove a newsgroup from the server
    fn remove_group(&self, group: &str) -> Result<()>;
}

/// Client-only mode: the server is assumed to carry the group already
pub struct NoServerAdmin;

impl ServerAdmin for NoServerAdmin {
    fn create_group(&self, _group: &str) -> Result<()> {
        Ok(())
    }
    fn remove_group(&self, _group: &str) -> Result<()> {
        Ok(())
    }
}

/// True if the message is addressed to the subscription mailbox
pub fn is_areafix(msg: &PacketMessage) -> bool {
    let to = msg.to_name.to_ascii_uppercase();
    to == "AREAFIX" || to == "AREAMGR"
}

/// Password gate: the request subject must equal the per-link password
pub fn password_valid(msg: &PacketMessage, expected: &str) -> bool {
    !expected.is_empty() && msg.subject.trim() == expected
}

/// Parse command lines from the request body
///
/// `#` comment lines are skipped and a `---` tear line ends the commands.
pub fn parse_commands(body: &str) -> Vec<Command> {
    let mut commands = Vec::new();
    for line in body.lines() {
        let line = line.trim();
        if line == "---" || line.starts_with("--- ") {
            break;
        }
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let upper = line.to_ascii_uppercase();
        if upper == "LIST" || upper == "%LIST" {
            commands.push(Command::List);
        } else if upper == "HELP" || upper == "%HELP" {
            commands.push(Command::Help);
        } else if upper.starts_with("QUERY") || line.starts_with('?') {
            let pattern = line
                .split_once(char::is_whitespace)
                .map(|(_, p)| p.trim().to_string())
                .filter(|p| !p.is_empty());
            commands.push(Command::Query(pattern));
        } else if let Some(area) = line.strip_prefix('-') {
            let area = area.trim();
            if !area.is_empty() {
                commands.push(Command::Unsubscribe(area.to_string()));
            }
        } else if !line.starts_with('%') {
            let area = line.strip_prefix('+').unwrap_or(line).trim();
            if !area.is_empty() {
                commands.push(Command::Subscribe(area.to_string()));
            }
        }
    }
    commands
}

/// Protection gate, evaluated before anything executes
///
/// Rejects the whole request when any command is exactly a bare wildcard
/// (the `+*` form parses to a `*` subscription) or when the number of
/// subscribe/unsubscribe commands exceeds the ceiling. Both short-circuit:
/// no partial application.
pub fn check_protection(commands: &[Command], limit: usize) -> Option<Protection> {
    for command in commands {
        if let Command::Subscribe(area) | Command::Unsubscribe(area) = command
            && area == "*"
        {
            return Some(Protection::Wildcard(area.clone()));
        }
    }

    let mutations = commands
        .iter()
        .filter(|c| matches!(c, Command::Subscribe(_) | Command::Unsubscribe(_)))
        .count();
    if mutations > limit {
        return Some(Protection::TooMany {
            count: mutations,
            limit,
        });
    }
    None
}

/// Result of processing one request
#[derive(Debug)]
pub struct AreafixOutcome {
    /// Reply body routed back to the requester; `None` is a silent drop
    pub reply: Option<String>,
    /// Number of subscription list changes applied
    pub changes: usize,
}

/// The command processor
pub struct AreafixProcessor<'a> {
    router: &'a AreaRouter,
    subscriptions: &'a mut SubscriptionList,
    admin: &'a dyn ServerAdmin,
    password: &'a str,
    limit: usize,
    client_mode: bool,
    footer: Option<&'a str>,
}

impl<'a> AreafixProcessor<'a> {
    /// Build a processor over the run's router and subscription list
    pub fn new(
        config: &'a GateConfig,
        router: &'a AreaRouter,
        subscriptions: &'a mut SubscriptionList,
        admin: &'a dyn ServerAdmin,
    ) -> Self {
        Self {
            router,
            subscriptions,
            admin,
            password: &config.fidonet.areafix_password,
            limit: config.areafix.max_areas_per_request,
            client_mode: config.gateway.client_mode,
            footer: config.areafix.footer.as_deref(),
        }
    }

    /// Run the gates and (maybe) the commands for one request
    pub fn process(&mut self, msg: &PacketMessage) -> AreafixOutcome {
        let requester = format!(
            "{} ({}/{})",
            msg.from_name, msg.orig_net, msg.orig_node
        );

        if !password_valid(msg, self.password) {
            // Silent drop: no reply tells a prober whether the password or
            // the mailbox was wrong
            warn!("areafix authentication failure from {}", requester);
            return AreafixOutcome {
                reply: None,
                changes: 0,
            };
        }

        let commands = parse_commands(&msg.body_text());
        info!("areafix request from {}: {} commands", requester, commands.len());

        if let Some(block) = check_protection(&commands, self.limit) {
            warn!("areafix request from {} blocked: {:?}", requester, block);
            return AreafixOutcome {
                reply: Some(self.blocked_reply(&block)),
                changes: 0,
            };
        }

        let mut lines = vec!["Areafix processing results:".to_string(), String::new()];
        let mut changes = 0;
        let mut trailing = Vec::new();

        for command in &commands {
            match command {
                Command::Subscribe(area) => {
                    let (line, changed) = self.subscribe(area);
                    if changed {
                        changes += 1;
                    }
                    info!("areafix {}: {}", requester, line);
                    lines.push(line);
                }
                Command::Unsubscribe(area) => {
                    let (line, changed) = self.unsubscribe(area);
                    if changed {
                        changes += 1;
                    }
                    info!("areafix {}: {}", requester, line);
                    lines.push(line);
                }
                Command::Query(pattern) => trailing.push(self.query(pattern.as_deref())),
                Command::List => trailing.push(self.list()),
                Command::Help => trailing.push(help_text().to_string()),
            }
        }

        for block in trailing {
            lines.push(String::new());
            lines.push(block);
        }
        lines.push(String::new());
        lines.push("--- End of response ---".to_string());
        if let Some(footer) = self.footer {
            lines.push(String::new());
            lines.push(footer.to_string());
        }

        AreafixOutcome {
            reply: Some(lines.join("\n")),
            changes,
        }
    }

    fn subscribe(&mut self, area: &str) -> (String, bool) {
        let Some(group) = self.router.newsgroup_for(area) else {
            return (format!("+ {}: FAILED - area not available", area), false);
        };
        if self.subscriptions.contains(&group) {
            return (format!("+ {}: ALREADY SUBSCRIBED", area), false);
        }
        if !self.client_mode
            && let Err(e) = self.admin.create_group(&group)
        {
            // The local list stays untouched when the server-side create fails
            return (format!("+ {}: FAILED - {}", area, e), false);
        }
        self.subscriptions.add(&group);
        (format!("+ {}: ADDED", area), true)
    }

    fn unsubscribe(&mut self, area: &str) -> (String, bool) {
        let Some(group) = self.router.newsgroup_for(area) else {
            return (format!("- {}: FAILED - area not found", area), false);
        };
        if !self.subscriptions.contains(&group) {
            return (format!("- {}: NOT SUBSCRIBED", area), false);
        }
        self.subscriptions.remove(&group);
        if !self.client_mode
            && let Err(e) = self.admin.remove_group(&group)
        {
            warn!("server-side remove of {} failed: {}", group, e);
        }
        (format!("- {}: UNSUBSCRIBED", area), true)
    }

    fn query(&self, pattern: Option<&str>) -> String {
        match pattern {
            Some(pattern) => {
                let matcher = glob_to_regex(pattern);
                let mut matched: Vec<String> = self
                    .router
                    .mappings()
                    .into_iter()
                    .map(|(_, group)| group)
                    .filter(|group| matcher.as_ref().is_some_and(|m| m.is_match(group)))
                    .collect();
                matched.sort();
                matched.dedup();

                if matched.is_empty() {
                    return format!("No areas found matching pattern: {}", pattern);
                }
                let width = matched.iter().map(String::len).max().unwrap_or(0) + 5;
                let mut out = format!("Areas matching '{}' ({} found):\n", pattern, matched.len());
                for group in &matched {
                    let subscribed = if self.subscriptions.contains(group) { "yes" } else { "no" };
                    out.push_str(&format!("{:<width$}{}\n", group, subscribed));
                }
                out.trim_end().to_string()
            }
            None => self.list(),
        }
    }

    fn list(&self) -> String {
        if self.subscriptions.is_empty() {
            return "No areas currently subscribed.\n\nUse QUERY <pattern> to search available areas."
                .to_string();
        }
        let mut groups: Vec<&str> = self
            .subscriptions
            .iter()
            .map(|s| s.newsgroup.as_str())
            .collect();
        groups.sort();
        format!(
            "Currently subscribed newsgroups ({}):\n{}",
            groups.len(),
            groups.join("\n")
        )
    }

    fn blocked_reply(&self, block: &Protection) -> String {
        let reason = match block {
            Protection::Wildcard(token) => format!(
                "Wildcard subscription '{}' is not permitted. Use QUERY to search for specific areas.",
                token
            ),
            Protection::TooMany { count, limit } => format!(
                "Too many subscription requests ({} areas). Maximum allowed is {}. Please subscribe in smaller batches.",
                count, limit
            ),
        };
        let mut reply = format!(
            "REQUEST BLOCKED\n\n{}\n\n\
             WHAT TO DO INSTEAD:\n\
             \x20 1. Use 'QUERY <pattern>' to search for areas\n\
             \x20    Example: QUERY comp.*\n\n\
             \x20 2. Subscribe to specific areas\n\
             \x20    Example: +comp.lang.rust\n\n\
             \x20 3. Send 'HELP' for command reference\n\n\
             Your request was blocked automatically; no changes were made.",
            reason
        );
        if let Some(footer) = self.footer {
            reply.push_str("\n\n");
            reply.push_str(footer);
        }
        reply
    }
}

/// Glob pattern (`*`, `?`) to an anchored case-insensitive regex
fn glob_to_regex(pattern: &str) -> Option<regex::Regex> {
    let mut expr = String::from("(?i)^");
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            c => expr.push_str(&regex::escape(&c.to_string())),
        }
    }
    expr.push('$');
    regex::Regex::new(&expr).ok()
}

fn help_text() -> &'static str {
    "Available commands (one per line in the message body):\n\
     \x20 +<area> or <area>   subscribe to an area\n\
     \x20 -<area>             unsubscribe from an area\n\
     \x20 QUERY <pattern>     search areas (wildcards: * and ?)\n\
     \x20 LIST                show subscribed areas\n\
     \x20 HELP                this text\n\
     The areafix password goes in the message subject."
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GateConfig;
    use std::path::Path;

    fn test_config() -> GateConfig {
        toml::from_str(
            r#"
                [fidonet]
                gateway_address = "2:292/854"
                linked_address = "2:292/8"
                areafix_password = "sekrit"

                [nntp]
                host = "news.example.com"

                [paths]
                inbound_dir = "in"
                outbound_dir = "out"
                areas_file = "areas.cfg"
                hold_dir = "hold"
            "#,
        )
        .unwrap()
    }

    fn request(subject: &str, body: &str) -> PacketMessage {
        PacketMessage {
            from_name: "Remote Sysop".to_string(),
            to_name: "Areafix".to_string(),
            subject: subject.to_string(),
            orig_net: 292,
            orig_node: 8,
            body: body.lines().map(str::to_string).collect(),
            ..Default::default()
        }
    }

    fn fixture(dir: &Path) -> (GateConfig, SubscriptionList, AreaRouter) {
        let config = test_config();
        std::fs::write(dir.join("areas.cfg"), "alt.bbs.already: 0-10\n").unwrap();
        let subs = SubscriptionList::load(&dir.join("areas.cfg")).unwrap();
        let router = AreaRouter::build(&config.remap, &subs, false);
        (config, subs, router)
    }

    #[test]
    fn test_recognition_and_password() {
        let msg = request("sekrit", "+alt.test");
        assert!(is_areafix(&msg));
        assert!(password_valid(&msg, "sekrit"));
        assert!(!password_valid(&msg, "other"));
        assert!(!password_valid(&msg, ""));

        let mut not_fix = request("sekrit", "");
        not_fix.to_name = "Sysop".to_string();
        assert!(!is_areafix(&not_fix));
    }

    #[test]
    fn test_parse_commands() {
        let body = "# comment\n+alt.one\nalt.two\n-alt.three\nQUERY comp.*\n?\nLIST\nHELP\n---\n+ignored.after.tear";
        let commands = parse_commands(body);
        assert_eq!(
            commands,
            vec![
                Command::Subscribe("alt.one".to_string()),
                Command::Subscribe("alt.two".to_string()),
                Command::Unsubscribe("alt.three".to_string()),
                Command::Query(Some("comp.*".to_string())),
                Command::Query(None),
                Command::List,
                Command::Help,
            ]
        );
    }

    #[test]
    fn test_wildcard_blocks_entire_request() {
        let dir = tempfile::tempdir().unwrap();
        let (config, mut subs, router) = fixture(dir.path());
        let before = subs.len();

        let mut processor = AreafixProcessor::new(&config, &router, &mut subs, &NoServerAdmin);
        let outcome = processor.process(&request("sekrit", "+alt.good\n*\n+alt.other"));

        assert_eq!(outcome.changes, 0);
        let reply = outcome.reply.unwrap();
        assert!(reply.contains("REQUEST BLOCKED"));
        assert!(reply.contains("WHAT TO DO INSTEAD"));
        assert_eq!(subs.len(), before);
    }

    #[test]
    fn test_plus_wildcard_blocks_too() {
        let commands = parse_commands("+*");
        assert_eq!(check_protection(&commands, 100), Some(Protection::Wildcard("*".to_string())));
    }

    #[test]
    fn test_batch_limit_is_exact() {
        let hundred: Vec<String> = (0..100).map(|i| format!("+area.{}", i)).collect();
        let commands = parse_commands(&hundred.join("\n"));
        assert_eq!(check_protection(&commands, 100), None);

        let one_more: Vec<String> = (0..101).map(|i| format!("+area.{}", i)).collect();
        let commands = parse_commands(&one_more.join("\n"));
        assert_eq!(
            check_protection(&commands, 100),
            Some(Protection::TooMany { count: 101, limit: 100 })
        );
    }

    #[test]
    fn test_hundred_subscribes_all_apply() {
        let dir = tempfile::tempdir().unwrap();
        let (config, mut subs, router) = fixture(dir.path());
        let body: Vec<String> = (0..100).map(|i| format!("+area.{}", i)).collect();

        let mut processor = AreafixProcessor::new(&config, &router, &mut subs, &NoServerAdmin);
        let outcome = processor.process(&request("sekrit", &body.join("\n")));
        assert_eq!(outcome.changes, 100);

        let blocked = processor.process(&request("sekrit", &{
            let b: Vec<String> = (100..201).map(|i| format!("+area.{}", i)).collect();
            b.join("\n")
        }));
        assert_eq!(blocked.changes, 0);
    }

    #[test]
    fn test_bad_password_is_silent_drop() {
        let dir = tempfile::tempdir().unwrap();
        let (config, mut subs, router) = fixture(dir.path());
        let mut processor = AreafixProcessor::new(&config, &router, &mut subs, &NoServerAdmin);
        let outcome = processor.process(&request("wrong", "+alt.test"));
        assert!(outcome.reply.is_none());
        assert_eq!(outcome.changes, 0);
    }

    #[test]
    fn test_subscribe_unsubscribe_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let (config, mut subs, router) = fixture(dir.path());
        let mut processor = AreafixProcessor::new(&config, &router, &mut subs, &NoServerAdmin);

        let outcome = processor.process(&request("sekrit", "+alt.new.group"));
        assert_eq!(outcome.changes, 1);
        assert!(outcome.reply.unwrap().contains("+ alt.new.group: ADDED"));

        let outcome = processor.process(&request("sekrit", "+alt.new.group"));
        assert_eq!(outcome.changes, 0);
        assert!(outcome.reply.unwrap().contains("ALREADY SUBSCRIBED"));

        let outcome = processor.process(&request("sekrit", "-alt.new.group"));
        assert_eq!(outcome.changes, 1);
        assert!(outcome.reply.unwrap().contains("UNSUBSCRIBED"));
        assert!(!subs.contains("alt.new.group"));
    }

    #[test]
    fn test_query_glob_with_subscription_marker() {
        let dir = tempfile::tempdir().unwrap();
        let (config, mut subs, router) = fixture(dir.path());
        let mut processor = AreafixProcessor::new(&config, &router, &mut subs, &NoServerAdmin);
        let outcome = processor.process(&request("sekrit", "QUERY alt.bbs.*"));
        let reply = outcome.reply.unwrap();
        assert!(reply.contains("alt.bbs.already"));
        assert!(reply.contains("yes"));
    }

    #[test]
    fn test_glob_matching() {
        let m = glob_to_regex("comp.*").unwrap();
        assert!(m.is_match("comp.lang.rust"));
        assert!(!m.is_match("alt.comp"));
        let m = glob_to_regex("alt.b?s").unwrap();
        assert!(m.is_match("alt.bbs"));
        assert!(!m.is_match("alt.bbss"));
    }
}
