use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub type MonitorId = i64;

const MAX_DESCRIPTION_LEN: usize = 255;
/// Upper bound for every seconds field: 30 days.
const MAX_SECONDS: u64 = 30 * 24 * 60 * 60;

fn default_timeout() -> u64 {
    5
}

/// The probe kind a monitor runs. Encoded as an integer on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MonitorType {
    /// HTTP(S) reachability of every URL in `items`.
    Site = 1,
    /// TCP connect to every `host:port` in `items`.
    Port = 2,
    /// ICMP echo to every host in `items`.
    HostAlive = 3,
    /// A process named `process` is running on this host.
    Process = 4,
    /// `script` exits with status 0.
    Script = 5,
}

impl MonitorType {
    pub const ALL: [MonitorType; 5] = [
        MonitorType::Site,
        MonitorType::Port,
        MonitorType::HostAlive,
        MonitorType::Process,
        MonitorType::Script,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorType::Site => "site",
            MonitorType::Port => "port",
            MonitorType::HostAlive => "host_alive",
            MonitorType::Process => "process",
            MonitorType::Script => "script",
        }
    }
}

impl fmt::Display for MonitorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u8> for MonitorType {
    type Error = ValidationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MonitorType::Site),
            2 => Ok(MonitorType::Port),
            3 => Ok(MonitorType::HostAlive),
            4 => Ok(MonitorType::Process),
            5 => Ok(MonitorType::Script),
            other => Err(ValidationError::UnknownType(other)),
        }
    }
}

impl From<MonitorType> for u8 {
    fn from(value: MonitorType) -> Self {
        value as u8
    }
}

/// Whether the engine should keep a probe loop running for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MonitorState {
    Disabled = 0,
    #[default]
    Enabled = 1,
}

impl MonitorState {
    pub fn is_enabled(&self) -> bool {
        matches!(self, MonitorState::Enabled)
    }
}

impl From<bool> for MonitorState {
    fn from(enabled: bool) -> Self {
        if enabled {
            MonitorState::Enabled
        } else {
            MonitorState::Disabled
        }
    }
}

impl TryFrom<u8> for MonitorState {
    type Error = ValidationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MonitorState::Disabled),
            1 => Ok(MonitorState::Enabled),
            other => Err(ValidationError::UnknownState(other)),
        }
    }
}

impl From<MonitorState> for u8 {
    fn from(value: MonitorState) -> Self {
        value as u8
    }
}

/// What a probe acts on. Which fields matter depends on the monitor type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorTarget {
    pub items: Vec<String>,
    pub process: String,
    pub script: String,
}

impl MonitorTarget {
    pub fn items<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            items: items.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn process(name: impl Into<String>) -> Self {
        Self {
            process: name.into(),
            ..Default::default()
        }
    }

    pub fn script(body: impl Into<String>) -> Self {
        Self {
            script: body.into(),
            ..Default::default()
        }
    }

    /// Checks that the fields required by `kind` are present.
    pub fn validate_for(&self, kind: MonitorType) -> Result<(), ValidationError> {
        match kind {
            MonitorType::Site | MonitorType::Port | MonitorType::HostAlive => {
                if self.items.is_empty() || self.items.iter().any(|i| i.trim().is_empty()) {
                    return Err(ValidationError::MissingItems(kind));
                }
                if kind == MonitorType::Port {
                    for item in &self.items {
                        let port_ok = item
                            .rsplit_once(':')
                            .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
                            .unwrap_or(false);
                        if !port_ok {
                            return Err(ValidationError::InvalidAddress(item.clone()));
                        }
                    }
                }
                Ok(())
            }
            MonitorType::Process if self.process.trim().is_empty() => {
                Err(ValidationError::MissingProcess)
            }
            MonitorType::Script if self.script.trim().is_empty() => {
                Err(ValidationError::MissingScript)
            }
            MonitorType::Process | MonitorType::Script => Ok(()),
        }
    }
}

/// A persisted health-check configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorRecord {
    pub id: MonitorId,
    #[serde(default)]
    pub namespace_id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub monitor_type: MonitorType,
    pub target: MonitorTarget,
    /// Probe interval in seconds.
    pub second: u64,
    /// Per-probe timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Consecutive failures that open an alert episode.
    pub times: u16,
    /// Minimum seconds between notifications within one episode.
    pub silent_cycle: u64,
    pub notify_type: u8,
    pub notify_target: String,
    /// Notification cap per episode; 0 is unlimited.
    #[serde(default)]
    pub notify_times: u16,
    #[serde(default)]
    pub state: MonitorState,
}

impl MonitorRecord {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.second)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn silent_cycle(&self) -> Duration {
        Duration::from_secs(self.silent_cycle)
    }

    pub fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }

    /// Rejects records the engine must never receive.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if self.description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(ValidationError::DescriptionTooLong(MAX_DESCRIPTION_LEN));
        }
        if self.second == 0 {
            return Err(ValidationError::NonPositive("second"));
        }
        if self.timeout == 0 {
            return Err(ValidationError::NonPositive("timeout"));
        }
        if self.times == 0 {
            return Err(ValidationError::NonPositive("times"));
        }
        if self.silent_cycle == 0 {
            return Err(ValidationError::NonPositive("silentCycle"));
        }
        for (field, value) in [
            ("second", self.second),
            ("timeout", self.timeout),
            ("silentCycle", self.silent_cycle),
        ] {
            if value > MAX_SECONDS {
                return Err(ValidationError::TooLarge {
                    field,
                    max: MAX_SECONDS,
                });
            }
        }
        if self.notify_type == 0 {
            return Err(ValidationError::NonPositive("notifyType"));
        }
        if self.notify_target.trim().is_empty() {
            return Err(ValidationError::EmptyNotifyTarget);
        }
        self.target.validate_for(self.monitor_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown monitor type: {0}")]
    UnknownType(u8),
    #[error("unknown monitor state: {0}")]
    UnknownState(u8),
    #[error("name is required")]
    EmptyName,
    #[error("description must be at most {0} characters")]
    DescriptionTooLong(usize),
    #[error("{0} must be greater than 0")]
    NonPositive(&'static str),
    #[error("{field} must be at most {max} seconds")]
    TooLarge { field: &'static str, max: u64 },
    #[error("notifyTarget is required")]
    EmptyNotifyTarget,
    #[error("{0} monitor requires at least one non-empty item")]
    MissingItems(MonitorType),
    #[error("invalid host:port address: {0}")]
    InvalidAddress(String),
    #[error("process monitor requires a process name")]
    MissingProcess,
    #[error("script monitor requires a script")]
    MissingScript,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site_record() -> MonitorRecord {
        MonitorRecord {
            id: 1,
            namespace_id: 1,
            name: "homepage".to_string(),
            description: String::new(),
            monitor_type: MonitorType::Site,
            target: MonitorTarget::items(["https://example.com"]),
            second: 60,
            timeout: 5,
            times: 3,
            silent_cycle: 600,
            notify_type: 1,
            notify_target: "https://hooks.example.com/abc".to_string(),
            notify_times: 2,
            state: MonitorState::Enabled,
        }
    }

    #[test]
    fn test_valid_record_passes() {
        assert_eq!(site_record().validate(), Ok(()));
    }

    #[test]
    fn test_non_positive_fields_rejected() {
        let mut record = site_record();
        record.second = 0;
        assert_eq!(record.validate(), Err(ValidationError::NonPositive("second")));

        let mut record = site_record();
        record.times = 0;
        assert_eq!(record.validate(), Err(ValidationError::NonPositive("times")));

        let mut record = site_record();
        record.silent_cycle = 0;
        assert_eq!(
            record.validate(),
            Err(ValidationError::NonPositive("silentCycle"))
        );
    }

    #[test]
    fn test_oversized_durations_rejected() {
        let mut record = site_record();
        record.second = u64::MAX;
        assert_eq!(
            record.validate(),
            Err(ValidationError::TooLarge {
                field: "second",
                max: MAX_SECONDS
            })
        );

        let mut record = site_record();
        record.silent_cycle = MAX_SECONDS + 1;
        assert!(matches!(
            record.validate(),
            Err(ValidationError::TooLarge { field: "silentCycle", .. })
        ));

        let mut record = site_record();
        record.second = MAX_SECONDS;
        record.timeout = MAX_SECONDS;
        assert_eq!(record.validate(), Ok(()));
    }

    #[test]
    fn test_kind_specific_fields() {
        let mut record = site_record();
        record.monitor_type = MonitorType::Script;
        assert_eq!(record.validate(), Err(ValidationError::MissingScript));
        record.target = MonitorTarget::script("exit 0");
        assert_eq!(record.validate(), Ok(()));

        record.monitor_type = MonitorType::Process;
        assert_eq!(record.validate(), Err(ValidationError::MissingProcess));

        record.monitor_type = MonitorType::Port;
        record.target = MonitorTarget::items(["db.internal"]);
        assert_eq!(
            record.validate(),
            Err(ValidationError::InvalidAddress("db.internal".to_string()))
        );
        record.target = MonitorTarget::items(["db.internal:5432"]);
        assert_eq!(record.validate(), Ok(()));

        record.target = MonitorTarget::items(Vec::<String>::new());
        assert_eq!(
            record.validate(),
            Err(ValidationError::MissingItems(MonitorType::Port))
        );
    }

    #[test]
    fn test_description_limit() {
        let mut record = site_record();
        record.description = "x".repeat(256);
        assert_eq!(
            record.validate(),
            Err(ValidationError::DescriptionTooLong(255))
        );
    }

    #[test]
    fn test_json_wire_format() {
        let json = r#"{
            "id": 7,
            "namespaceId": 2,
            "name": "api",
            "type": 2,
            "target": {"items": ["10.0.0.5:443"]},
            "second": 30,
            "times": 2,
            "silentCycle": 300,
            "notifyType": 255,
            "notifyTarget": "ops"
        }"#;
        let record: MonitorRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.monitor_type, MonitorType::Port);
        assert_eq!(record.timeout, 5);
        assert_eq!(record.notify_times, 0);
        assert_eq!(record.state, MonitorState::Enabled);
        assert_eq!(record.target.items, vec!["10.0.0.5:443".to_string()]);

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], 2);
        assert_eq!(value["state"], 1);
        assert_eq!(value["silentCycle"], 300);
    }

    #[test]
    fn test_unknown_type_rejected_on_decode() {
        let json = r#"{"id":1,"name":"x","type":9,"target":{},"second":1,"times":1,
            "silentCycle":1,"notifyType":1,"notifyTarget":"t"}"#;
        assert!(serde_json::from_str::<MonitorRecord>(json).is_err());
    }
}
