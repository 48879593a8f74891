//! Store keys owned by one logical breaker.

/// The seven store keys derived from `(prefix, key)`.
///
/// | Key | Type | Contents |
/// |-----|------|----------|
/// | `<prefix>:state:<key>` | string | encoded [`StateRecord`](crate::StateRecord) |
/// | `<prefix>:req:<key>` | sorted set | every counted call |
/// | `<prefix>:succ:<key>` | sorted set | successful calls |
/// | `<prefix>:fail:<key>` | sorted set | failed calls |
/// | `<prefix>:consucc:<key>` | sorted set | successes since the last failure |
/// | `<prefix>:confail:<key>` | sorted set | failures since the last success |
/// | `<prefix>:half:<key>` | sorted set | marker of the running trial |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerKeys {
    pub(crate) state: String,
    pub(crate) requests: String,
    pub(crate) successes: String,
    pub(crate) failures: String,
    pub(crate) consecutive_successes: String,
    pub(crate) consecutive_failures: String,
    pub(crate) half_open: String,
}

impl BreakerKeys {
    /// Derives the keys of breaker `key` under `prefix`.
    #[must_use]
    pub fn new(prefix: &str, key: &str) -> Self {
        let derive = |kind: &str| format!("{prefix}:{kind}:{key}");
        Self {
            state: derive("state"),
            requests: derive("req"),
            successes: derive("succ"),
            failures: derive("fail"),
            consecutive_successes: derive("consucc"),
            consecutive_failures: derive("confail"),
            half_open: derive("half"),
        }
    }

    /// Key of the state record.
    #[must_use]
    pub fn state(&self) -> &str {
        &self.state
    }

    /// Key of the trial marker set.
    #[must_use]
    pub fn half_open(&self) -> &str {
        &self.half_open
    }

    /// The five counting windows, in the order their counts are read.
    #[must_use]
    pub fn windows(&self) -> [&str; 5] {
        [
            &self.requests,
            &self.successes,
            &self.failures,
            &self.consecutive_successes,
            &self.consecutive_failures,
        ]
    }

    /// Every key of the breaker.
    #[must_use]
    pub fn all(&self) -> [&str; 7] {
        let [requests, successes, failures, consecutive_successes, consecutive_failures] =
            self.windows();
        [
            &self.state,
            requests,
            successes,
            failures,
            consecutive_successes,
            consecutive_failures,
            &self.half_open,
        ]
    }
}
