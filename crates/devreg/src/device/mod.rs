//! Device records and the value types they carry.

mod mac;
mod schedule;

pub use mac::MacId;
pub use schedule::Schedule;
pub use schedule::ScheduleMode;

use serde::Deserialize;
use serde::Serialize;

/// Store-assigned identifier, fixed once the device is inserted
pub type DeviceId = String;

/// A registered device as stored and as returned over HTTP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<DeviceId>,

    #[serde(default)]
    pub name: String,

    pub mac: MacId,

    /// Free-form location, usually "lat,long"
    #[serde(default)]
    pub location: String,

    /// Hardware platform description
    #[serde(default)]
    pub make: String,

    /// Owner identifiers (emails), semantically a set
    #[serde(default)]
    pub users: Vec<String>,

    #[serde(default)]
    pub cfg: Option<Schedule>,
}

impl Device {
    /// MAC well formed, at least one owner, schedule present and valid
    pub fn is_valid(&self) -> bool {
        self.mac.is_valid()
            && !self.users.is_empty()
            && self.cfg.as_ref().is_some_and(Schedule::is_valid)
    }
}

/// Remove repeated owners, keeping the first occurrence of each
pub fn dedup_owners<I>(owners: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut out: Vec<String> = Vec::new();
    for owner in owners {
        if !out.contains(&owner) {
            out.push(owner);
        }
    }
    out
}


#[cfg(test)]
mod tests {
    use super::fixtures::device;
    use super::*;

    #[test]
    fn test_valid_device() {
        assert!(device("b8:27:eb:a5:be:48").is_valid());
    }

    #[test]
    fn test_each_conjunct_falsifies_validity() {
        let bad_mac = device("b8:27:eb:a5:be");
        assert!(!bad_mac.is_valid());

        let mut no_owners = device("b8:27:eb:a5:be:48");
        no_owners.users.clear();
        assert!(!no_owners.is_valid());

        let mut no_schedule = device("b8:27:eb:a5:be:48");
        no_schedule.cfg = None;
        assert!(!no_schedule.is_valid());

        let mut bad_schedule = device("b8:27:eb:a5:be:48");
        bad_schedule.cfg = Some(fixtures::schedule(0));
        assert!(!bad_schedule.is_valid());
    }

    #[test]
    fn test_dedup_owners_keeps_order() {
        let owners = dedup_owners(
            ["b@x.com", "a@x.com", "b@x.com", "c@x.com", "a@x.com"]
                .into_iter()
                .map(String::from),
        );
        assert_eq!(owners, vec!["b@x.com", "a@x.com", "c@x.com"]);
    }

    #[test]
    fn test_id_omitted_until_assigned() {
        let json = serde_json::to_value(device("b8:27:eb:a5:be:48")).unwrap();
        assert!(json.get("id").is_none());
        assert_eq!(json["mac"], "b8:27:eb:a5:be:48");
        assert_eq!(json["cfg"]["interval"], 60);
    }

    #[test]
    fn test_payload_with_missing_schedule_binds() {
        let dev: Device =
            serde_json::from_str(r#"{"mac":"b8:27:eb:a5:be:48","users":["a@x.com"]}"#).unwrap();
        assert!(dev.cfg.is_none());
        assert!(!dev.is_valid());
    }
}
