use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which name axis a classification applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationKind {
    Zone,
    Interface,
}

impl ClassificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationKind::Zone => "zone",
            ClassificationKind::Interface => "interface",
        }
    }
}

impl fmt::Display for ClassificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side of the firewall a zone or interface faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationSide {
    Inside,
    Outside,
    Remote,
    Unknown,
}

impl ClassificationSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationSide::Inside => "inside",
            ClassificationSide::Outside => "outside",
            ClassificationSide::Remote => "remote",
            ClassificationSide::Unknown => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, ClassificationSide::Unknown)
    }
}

impl fmt::Display for ClassificationSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClassificationSide {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inside" => Ok(ClassificationSide::Inside),
            "outside" => Ok(ClassificationSide::Outside),
            "remote" => Ok(ClassificationSide::Remote),
            "unknown" => Ok(ClassificationSide::Unknown),
            _ => Err(()),
        }
    }
}

/// Whether zone or interface wins when deriving recv/dest side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationPrecedence {
    #[default]
    ZoneFirst,
    InterfaceFirst,
}

impl FromStr for ClassificationPrecedence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zone_first" => Ok(ClassificationPrecedence::ZoneFirst),
            "interface_first" => Ok(ClassificationPrecedence::InterfaceFirst),
            other => Err(format!("unknown classification precedence: {other}")),
        }
    }
}

/// Authoritative per-device mapping of a zone/interface name to a side.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Classification {
    pub id: i64,
    pub device: String,
    pub kind: String,
    pub name: String,
    pub side: String,
    pub priority: i32,
}

/// Zone/interface names seen in events with no classification yet.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UnclassifiedEndpoint {
    pub id: i64,
    pub device: String,
    pub kind: String,
    pub name: String,
    pub count: i64,
}
