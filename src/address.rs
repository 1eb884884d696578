//! FidoNet addressing (FTS-0001 / FSP-1004)
//!
//! An address is `zone:net/node` with an optional `.point` suffix and an
//! optional `@domain` tail. Point addresses must survive a parse/serialize
//! round trip without loss.

use std::fmt;
use std::str::FromStr;

use crate::error::{GateError, Result};

/// A 4D FidoNet address: zone:net/node.point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FidoAddress {
    /// Zone number (1 = North America, 2 = Europe, ...)
    pub zone: u16,
    /// Network number within the zone
    pub net: u16,
    /// Node number within the network
    pub node: u16,
    /// Point number; 0 for a boxed (non-point) system
    pub point: u16,
}

impl FidoAddress {
    /// Create a 3D address (point 0)
    pub fn new(zone: u16, net: u16, node: u16) -> Self {
        Self {
            zone,
            net,
            node,
            point: 0,
        }
    }

    /// True if this is a point address (point > 0)
    pub fn is_point(&self) -> bool {
        self.point != 0
    }

    /// `net/node` form used in SEEN-BY and PATH echomail trailer lines
    pub fn seen_by_form(&self) -> String {
        format!("{}/{}", self.net, self.node)
    }

    /// Address with `:` and `/` replaced by `.`, the shape embedded in
    /// gateway-minted Message-IDs (`<serial.zone.net.node[.point]@domain>`)
    pub fn dotted_form(&self) -> String {
        if self.is_point() {
            format!("{}.{}.{}.{}", self.zone, self.net, self.node, self.point)
        } else {
            format!("{}.{}.{}", self.zone, self.net, self.node)
        }
    }
}

impl fmt::Display for FidoAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.zone, self.net, self.node)?;
        if self.is_point() {
            write!(f, ".{}", self.point)?;
        }
        Ok(())
    }
}

impl FromStr for FidoAddress {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || GateError::InvalidAddress(s.to_string());

        // Strip the optional @domain tail
        let addr = s.split('@').next().unwrap_or(s).trim();
        if addr.is_empty() {
            return Err(bad());
        }

        let (zone_part, rest) = match addr.split_once(':') {
            Some((z, r)) => (Some(z), r),
            None => (None, addr),
        };
        let zone = match zone_part {
            Some(z) => z.parse::<u16>().map_err(|_| bad())?,
            // Zoneless addresses default to zone 1
            None => 1,
        };

        let (net_part, node_part) = rest.split_once('/').ok_or_else(bad)?;
        let net = net_part.parse::<u16>().map_err(|_| bad())?;

        let (node, point) = match node_part.split_once('.') {
            Some((n, p)) => (
                n.parse::<u16>().map_err(|_| bad())?,
                p.parse::<u16>().map_err(|_| bad())?,
            ),
            None => (node_part.parse::<u16>().map_err(|_| bad())?, 0),
        };

        Ok(Self {
            zone,
            net,
            node,
            point,
        })
    }
}

impl<'de> serde::Deserialize<'de> for FidoAddress {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl serde::Serialize for FidoAddress {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
