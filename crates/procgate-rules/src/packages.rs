//! Lenient parsing of package database records
//!
//! The database is an XML stream, but the consumed subset is strictly
//! line-oriented: records are lines of the form
//! `<package key1="value1" key2="value2" ...>`. Only `name`, `userId`, and
//! `sharedUserId` matter; everything else is skipped. A malformed record
//! stops parsing of that record, never of the file.

/// The fields of one `<package ...>` record that the rule store consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRecord {
    pub name: String,
    /// All `userId` / `sharedUserId` values found on the record.
    pub uids: Vec<u32>,
}

/// Parse one line of the package database. Returns `None` for lines that
/// are not package records or that lack a `name` attribute.
///
/// All attributes are scanned before the record is concluded, so a
/// `sharedUserId` appearing before `name` is still picked up.
pub fn parse_record(line: &str) -> Option<PackageRecord> {
    let rest = line.trim_start().strip_prefix("<package ")?;
    let rest = rest
        .trim_end()
        .trim_end_matches('>')
        .trim_end_matches('/');

    let mut name = None;
    let mut uids = Vec::new();

    let mut s = rest;
    while let Some(eq) = s.find('=') {
        let key = s[..eq].trim();
        // Attribute values are always double-quoted
        let Some(after) = s[eq + 1..].strip_prefix('"') else {
            break;
        };
        let Some(close) = after.find('"') else {
            break;
        };
        let value = &after[..close];
        s = &after[close + 1..];

        match key {
            "name" => name = Some(value.to_string()),
            "userId" | "sharedUserId" => {
                if let Ok(uid) = value.parse() {
                    uids.push(uid);
                }
            }
            _ => {}
        }
    }

    Some(PackageRecord { name: name?, uids })
}
