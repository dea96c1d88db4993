//! Saved blocking profiles (JSON).
//!
//! ```json
//! {
//!   "paths": ["/usr/bin/steam"],
//!   "names": ["discord", "calc"],
//!   "duration": "45m",
//!   "start_at": "09:00",
//!   "poll_interval": "2s",
//!   "notify": false
//! }
//! ```
//!
//! Every field is optional. Lists are merged with the command line; scalars on
//! the command line win.

use crate::error::BlockError;
use crate::model::{StartTime, MAX_DURATION_MINUTES, MAX_POLL_INTERVAL_SECS};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Profile {
    pub paths: Vec<PathBuf>,
    pub names: Vec<String>,
    #[serde(with = "humantime_serde")]
    pub duration: Option<Duration>,
    pub start_at: Option<StartTime>,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Option<Duration>,
    pub notify: Option<bool>,
}

impl Profile {
    /// Session length, if set: a whole number of minutes in `1..=1440`.
    pub fn checked_duration(&self) -> Result<Option<Duration>, BlockError> {
        let Some(duration) = self.duration else {
            return Ok(None);
        };
        let secs = duration.as_secs();
        let whole_minutes = duration.subsec_nanos() == 0 && secs % 60 == 0;
        if !whole_minutes || !(1..=MAX_DURATION_MINUTES).contains(&(secs / 60)) {
            return Err(BlockError::Config(format!(
                "profile duration {} must be a whole number of minutes between 1 and {}",
                humantime::format_duration(duration),
                MAX_DURATION_MINUTES
            )));
        }
        Ok(Some(duration))
    }

    /// Sweep interval, if set: whole seconds in `1..=60`.
    pub fn checked_poll_interval(&self) -> Result<Option<Duration>, BlockError> {
        let Some(interval) = self.poll_interval else {
            return Ok(None);
        };
        let secs = interval.as_secs();
        if interval.subsec_nanos() != 0 || !(1..=MAX_POLL_INTERVAL_SECS).contains(&secs) {
            return Err(BlockError::Config(format!(
                "profile poll_interval {} must be between 1 and {} seconds",
                humantime::format_duration(interval),
                MAX_POLL_INTERVAL_SECS
            )));
        }
        Ok(Some(interval))
    }
}

pub fn load(path: &Path) -> Result<Profile, BlockError> {
    let raw = std::fs::read_to_string(path).map_err(|source| BlockError::ProfileRead {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| BlockError::ProfileParse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_full_profile() {
        let f = write(
            r#"{"paths":["/usr/bin/steam"],"names":["Discord"],"duration":"45m",
                "start_at":"09:00","poll_interval":"2s","notify":false}"#,
        );
        let p = load(f.path()).unwrap();
        assert_eq!(p.paths, vec![PathBuf::from("/usr/bin/steam")]);
        assert_eq!(p.names, vec!["Discord".to_string()]);
        assert_eq!(p.duration, Some(Duration::from_secs(45 * 60)));
        assert_eq!(p.start_at, Some(StartTime::new(9, 0).unwrap()));
        assert_eq!(p.poll_interval, Some(Duration::from_secs(2)));
        assert_eq!(p.notify, Some(false));
    }

    #[test]
    fn missing_fields_default() {
        let f = write(r#"{"names":["calc"]}"#);
        let p = load(f.path()).unwrap();
        assert!(p.paths.is_empty());
        assert_eq!(p.duration, None);
        assert_eq!(p.start_at, None);
    }

    #[test]
    fn malformed_start_time_is_a_parse_error() {
        let f = write(r#"{"names":["calc"],"start_at":"25:00"}"#);
        assert!(matches!(
            load(f.path()),
            Err(BlockError::ProfileParse { .. })
        ));
    }

    fn profile(json: &str) -> Profile {
        load(write(json).path()).unwrap()
    }

    #[test]
    fn duration_must_be_whole_minutes_within_a_day() {
        for bad in ["30s", "90s", "0m", "1441m", "2000m"] {
            let p = profile(&format!(r#"{{"duration":"{bad}"}}"#));
            assert!(
                matches!(p.checked_duration(), Err(BlockError::Config(_))),
                "{bad}"
            );
        }
        let p = profile(r#"{"duration":"24h"}"#);
        assert_eq!(p.checked_duration().unwrap(), Some(Duration::from_secs(86_400)));
        assert_eq!(profile("{}").checked_duration().unwrap(), None);
    }

    #[test]
    fn poll_interval_must_be_one_to_sixty_seconds() {
        for bad in ["0s", "500ms", "1500ms", "61s", "5m"] {
            let p = profile(&format!(r#"{{"poll_interval":"{bad}"}}"#));
            assert!(
                matches!(p.checked_poll_interval(), Err(BlockError::Config(_))),
                "{bad}"
            );
        }
        let p = profile(r#"{"poll_interval":"1m"}"#);
        assert_eq!(p.checked_poll_interval().unwrap(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let f = write(r#"{"names":["calc"],"duraton":"5m"}"#);
        assert!(load(f.path()).is_err());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, BlockError::ProfileRead { .. }));
    }
}
