//! Event dispatch: decode the payload, look up the ref, run its scripts.
//!
//! ## Processing Flow
//!
//! ```text
//! body → EventPayload → ScriptTable::get(ref) → run_script() for each, in order
//! ```
//!
//! One dispatch runs at a time. The lock is held from decoding until the last
//! script exits, so batches for different refs never overlap either.

use std::fmt;

use serde::de::{self, Deserialize, Deserializer, IgnoredAny, MapAccess, Visitor};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::scripts::{run_script, ScriptError, ScriptTable};

/// Webhook event body. Only the ref matters.
///
/// The `ref` key matches case-insensitively and every other key is ignored.
/// A missing or null `ref`, or a `null` body, is the empty string.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct EventPayload {
    pub git_ref: String,
}

impl EventPayload {
    /// Decode the first JSON value in `body`. Anything after it is ignored.
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        let mut deserializer = serde_json::Deserializer::from_slice(body);
        Self::deserialize(&mut deserializer)
    }
}

impl<'de> Deserialize<'de> for EventPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(PayloadVisitor)
    }
}

struct PayloadVisitor;

impl<'de> Visitor<'de> for PayloadVisitor {
    type Value = EventPayload;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<EventPayload, A::Error> {
        let mut payload = EventPayload::default();

        while let Some(key) = map.next_key::<String>()? {
            if key.eq_ignore_ascii_case("ref") {
                if let Some(git_ref) = map.next_value::<Option<String>>()? {
                    payload.git_ref = git_ref;
                }
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }

        Ok(payload)
    }

    fn visit_unit<E: de::Error>(self) -> Result<EventPayload, E> {
        Ok(EventPayload::default())
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0}")]
    Payload(#[from] serde_json::Error),

    #[error("{0}")]
    Script(#[from] ScriptError),
}

/// Runs the scripts configured for an event's ref, one batch at a time.
#[derive(Debug)]
pub struct Dispatcher {
    scripts: ScriptTable,
    lock: Mutex<()>,
}

impl Dispatcher {
    pub fn new(scripts: ScriptTable) -> Self {
        Self {
            scripts,
            lock: Mutex::new(()),
        }
    }

    pub fn scripts(&self) -> &ScriptTable {
        &self.scripts
    }

    /// Handle one raw event body.
    ///
    /// Returns the number of scripts that ran. Stops at the first failing
    /// script; scripts that already ran are not undone.
    pub async fn dispatch(&self, body: &[u8]) -> Result<usize, DispatchError> {
        let _guard = self.lock.lock().await;

        let payload = EventPayload::from_json(body).map_err(|e| {
            warn!(error = %e, "event_payload_invalid");
            e
        })?;

        let scripts = self.scripts.get(&payload.git_ref);
        info!(
            git_ref = %payload.git_ref,
            script_count = scripts.len(),
            "event_dispatch_start"
        );

        for (index, script) in scripts.iter().enumerate() {
            if let Err(e) = run_script(script).await {
                warn!(
                    git_ref = %payload.git_ref,
                    error = %e,
                    completed = index,
                    skipped = scripts.len() - index - 1,
                    "event_dispatch_failed"
                );
                return Err(e.into());
            }
        }

        info!(git_ref = %payload.git_ref, "event_dispatch_complete");

        Ok(scripts.len())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::Setting;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::{Duration, Instant};

    /// Write an executable shell script that runs `body`.
    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn dispatcher(groups: Vec<(Vec<&str>, Vec<PathBuf>)>) -> Dispatcher {
        let settings: Vec<Setting> = groups
            .into_iter()
            .map(|(refs, scripts)| Setting {
                refs: refs.into_iter().map(String::from).collect(),
                scripts,
            })
            .collect();
        Dispatcher::new(ScriptTable::from_settings(&settings))
    }

    fn read_log(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }

    fn git_ref(body: &str) -> String {
        EventPayload::from_json(body.as_bytes()).unwrap().git_ref
    }

    #[test]
    fn test_payload_missing_or_null_ref_is_empty() {
        assert_eq!(git_ref(r#"{"after":"abc"}"#), "");
        assert_eq!(git_ref(r#"{"ref":null}"#), "");
        assert_eq!(git_ref("{}"), "");
        assert_eq!(git_ref("null"), "");
    }

    #[test]
    fn test_payload_ref_key_ignores_case() {
        for key in ["ref", "Ref", "REF", "rEf"] {
            assert_eq!(git_ref(&format!(r#"{{"{key}":"refs/heads/x"}}"#)), "refs/heads/x", "{key}");
        }
    }

    #[test]
    fn test_payload_ignores_other_fields_and_trailing_data() {
        assert_eq!(
            git_ref(r#"{"before":"0","ref":"main","commits":[{"id":1}]}"#),
            "main"
        );
        assert_eq!(git_ref("{\"ref\":\"main\"}\n{\"ref\":\"dev\"}"), "main");
        assert_eq!(git_ref(r#"{"ref":"main"} trailing"#), "main");
    }

    #[test]
    fn test_payload_rejects_non_objects() {
        for body in ["not-json", "", "[]", r#""main""#, r#"{"ref":1}"#, r#"{"ref":"main""#] {
            assert!(EventPayload::from_json(body.as_bytes()).is_err(), "{body:?}");
        }
    }

    #[tokio::test]
    async fn test_dispatch_runs_scripts_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log");
        let scripts: Vec<PathBuf> = (1..=3)
            .map(|i| {
                write_script(
                    dir.path(),
                    &format!("s{i}.sh"),
                    &format!("echo {i} >> {}", log.display()),
                )
            })
            .collect();

        let d = dispatcher(vec![(vec!["refs/heads/main"], scripts)]);
        let ran = d.dispatch(br#"{"ref":"refs/heads/main"}"#).await.unwrap();

        assert_eq!(ran, 3);
        assert_eq!(read_log(&log), vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_dispatch_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log");
        let first = write_script(dir.path(), "first.sh", &format!("echo first >> {}", log.display()));
        let failing = write_script(
            dir.path(),
            "failing.sh",
            &format!("echo failing >> {}\nexit 1", log.display()),
        );
        let last = write_script(dir.path(), "last.sh", &format!("echo last >> {}", log.display()));

        let d = dispatcher(vec![(vec!["main"], vec![first, failing, last])]);
        let err = d.dispatch(br#"{"ref":"main"}"#).await.unwrap_err();

        assert!(matches!(err, DispatchError::Script(ScriptError::Failed { .. })));
        assert_eq!(read_log(&log), vec!["first", "failing"]);
    }

    #[tokio::test]
    async fn test_dispatch_unknown_ref_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log");
        let script = write_script(dir.path(), "s.sh", &format!("echo ran >> {}", log.display()));

        let d = dispatcher(vec![(vec!["main"], vec![script])]);
        let ran = d.dispatch(br#"{"ref":"refs/heads/other"}"#).await.unwrap();

        assert_eq!(ran, 0);
        assert!(read_log(&log).is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_invalid_json_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log");
        let script = write_script(dir.path(), "s.sh", &format!("echo ran >> {}", log.display()));

        let d = dispatcher(vec![(vec![""], vec![script])]);
        let err = d.dispatch(b"not-json").await.unwrap_err();

        assert!(matches!(err, DispatchError::Payload(_)));
        assert!(read_log(&log).is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_serializes_concurrent_batches() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log");
        let a = write_script(
            dir.path(),
            "a.sh",
            &format!("echo start-a >> {0}\nsleep 0.3\necho end-a >> {0}", log.display()),
        );
        let b = write_script(
            dir.path(),
            "b.sh",
            &format!("echo start-b >> {0}\nsleep 0.3\necho end-b >> {0}", log.display()),
        );

        let d = dispatcher(vec![(vec!["a"], vec![a]), (vec!["b"], vec![b])]);

        let started = Instant::now();
        let (ra, rb) = tokio::join!(d.dispatch(br#"{"ref":"a"}"#), d.dispatch(br#"{"ref":"b"}"#));
        let elapsed = started.elapsed();

        assert_eq!(ra.unwrap(), 1);
        assert_eq!(rb.unwrap(), 1);
        assert!(elapsed >= Duration::from_millis(600), "elapsed {elapsed:?}");

        let lines = read_log(&log);
        assert_eq!(lines.len(), 4);
        // Each batch finishes before the other starts.
        assert_eq!(lines[0].replace("start", "end"), lines[1]);
        assert_eq!(lines[2].replace("start", "end"), lines[3]);
    }
}
