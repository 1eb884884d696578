#![doc = include_str!("../README.md")]

/// FidoNet addressing (zone:net/node.point)
pub mod address;
/// Areafix subscription-management protocol
pub mod areafix;
/// Area routing and the subscription/watermark list
pub mod areas;
/// RFC 5536 article model (gateway subset)
pub mod article;
/// FTS-5003 character set handling
pub mod charset;
mod config;
/// RFC 2047 encoded-word decoding
pub mod encoded_words;
mod error;
/// Gateway phase orchestration
pub mod gateway;
/// Hold-for-review store and sysop notification state
pub mod hold;
/// Message identity translation and threading
pub mod identity;
/// Run lock (one active run system-wide)
pub mod lock;
/// NNTP transport with per-article fetch outcomes
pub mod nntp;
/// FTS-0001 packet codec
pub mod packet;
/// Spam filter
pub mod spam;

pub use areafix::{AreafixProcessor, Command, NoServerAdmin, Protection, ServerAdmin};
pub use areas::{AreaRouter, Subscription, SubscriptionList, Watermark};
pub use article::{Article, Headers, parse_article, parse_headers};
pub use config::{
    AreaRemap, AreafixSection, FidonetSection, GateConfig, GatewaySection, HoldSection,
    NntpConfig, PathsSection, PatternRule, SpamSection,
};
pub use error::{GateError, Result};
pub use gateway::Gateway;
pub use hold::{Direction, HeldMessage, HoldStatus, HoldStore, Resolution};
pub use identity::{
    Translator, dedup_key, fresh_message_id, fresh_msgid, hyphenate_ipv6_domain, identity_domain,
    message_id_from_msgid, msgid_from_message_id,
};
pub use lock::RunLock;
pub use nntp::{ArticleOutcome, FetchReport, FetchedArticle, NntpTransport};
pub use packet::{Kludge, Packet, PacketMessage, decode as decode_packet, encode as encode_packet};
pub use spam::{FilterInput, SpamFilter, Verdict};
