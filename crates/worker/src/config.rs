use std::time::Duration;

/// Scheduler settings loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Time between polls for due runs (default: 30s).
    pub poll_interval: Duration,
    /// Most runs claimed per poll (default: 10).
    pub batch_size: i64,
    /// Stop a scheduled run at its first failing row even when the payload
    /// does not ask for it.
    pub abort_on_first_failure: bool,
    /// How often a running entry is checked for cancellation (default: 5s).
    pub cancel_check_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            batch_size: 10,
            abort_on_first_failure: false,
            cancel_check_interval: Duration::from_secs(5),
        }
    }
}

impl WorkerConfig {
    /// | Env Var                            | Default |
    /// |------------------------------------|---------|
    /// | `SCHEDULER_POLL_SECS`              | `30`    |
    /// | `SCHEDULER_BATCH_SIZE`             | `10`    |
    /// | `SCHEDULER_ABORT_ON_FIRST_FAILURE` | `false` |
    /// | `SCHEDULER_CANCEL_CHECK_SECS`      | `5`     |
    ///
    /// # Panics
    ///
    /// Panics on malformed values.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let poll_interval = lookup("SCHEDULER_POLL_SECS")
            .map(|v| {
                Duration::from_secs(v.parse().expect("SCHEDULER_POLL_SECS must be a valid u64"))
            })
            .unwrap_or(defaults.poll_interval);

        let batch_size = lookup("SCHEDULER_BATCH_SIZE")
            .map(|v| v.parse().expect("SCHEDULER_BATCH_SIZE must be a valid i64"))
            .unwrap_or(defaults.batch_size);

        let abort_on_first_failure = lookup("SCHEDULER_ABORT_ON_FIRST_FAILURE")
            .map(|v| parse_flag(&v).expect("SCHEDULER_ABORT_ON_FIRST_FAILURE must be true or false"))
            .unwrap_or(defaults.abort_on_first_failure);

        let cancel_check_interval = lookup("SCHEDULER_CANCEL_CHECK_SECS")
            .map(|v| {
                Duration::from_secs(
                    v.parse()
                        .expect("SCHEDULER_CANCEL_CHECK_SECS must be a valid u64"),
                )
            })
            .unwrap_or(defaults.cancel_check_interval);

        Self {
            poll_interval,
            batch_size,
            abort_on_first_failure,
            cancel_check_interval,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> WorkerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let c = config(&[]);
        assert_eq!(c.poll_interval, Duration::from_secs(30));
        assert_eq!(c.batch_size, 10);
        assert!(!c.abort_on_first_failure);
    }

    #[test]
    fn reads_overrides() {
        let c = config(&[
            ("SCHEDULER_POLL_SECS", "2"),
            ("SCHEDULER_BATCH_SIZE", "50"),
            ("SCHEDULER_ABORT_ON_FIRST_FAILURE", "Yes"),
        ]);
        assert_eq!(c.poll_interval, Duration::from_secs(2));
        assert_eq!(c.batch_size, 50);
        assert!(c.abort_on_first_failure);
    }

    #[test]
    #[should_panic(expected = "SCHEDULER_ABORT_ON_FIRST_FAILURE")]
    fn rejects_unknown_flag() {
        config(&[("SCHEDULER_ABORT_ON_FIRST_FAILURE", "sometimes")]);
    }
}
