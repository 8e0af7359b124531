use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pages in `/proc/self/statm` are assumed to be 4 KiB.
const PAGE_SIZE: u64 = 4096;

/// Process memory at a point in time. Fields are `None` where the platform
/// does not expose them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSnapshot {
    pub captured_at: DateTime<Utc>,
    pub rss_bytes: Option<u64>,
    pub virtual_bytes: Option<u64>,
}

impl ResourceSnapshot {
    pub fn capture() -> Self {
        let (virtual_bytes, rss_bytes) = read_statm().unwrap_or((None, None));
        Self {
            captured_at: Utc::now(),
            rss_bytes,
            virtual_bytes,
        }
    }

    pub fn empty() -> Self {
        Self {
            captured_at: Utc::now(),
            rss_bytes: None,
            virtual_bytes: None,
        }
    }
}

fn read_statm() -> Option<(Option<u64>, Option<u64>)> {
    let content = std::fs::read_to_string("/proc/self/statm").ok()?;
    Some(parse_statm(&content))
}

fn parse_statm(content: &str) -> (Option<u64>, Option<u64>) {
    let mut fields = content.split_whitespace().map(|f| f.parse::<u64>().ok());
    let size = fields.next().flatten().map(|p| p * PAGE_SIZE);
    let resident = fields.next().flatten().map(|p| p * PAGE_SIZE);
    (size, resident)
}
