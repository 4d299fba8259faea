use std::fmt;
use std::time::Duration;
use tracing::Dispatch;

/// Dial timeout used when none is configured.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Options for connecting to a server.
///
/// `D` is the dial function type of the front-end in use. Use the `ConnectOptions` alias of the
/// `sync` or `async` module rather than naming this type directly.
pub struct Options<D> {
    pub(crate) dial: Option<D>,
    pub(crate) password: Option<String>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) dispatch: Option<Dispatch>,
}

impl<D> Options<D> {
    pub fn new() -> Self {
        Options {
            dial: None,
            password: None,
            timeout: None,
            dispatch: None,
        }
    }

    /// RCON password. Without one (or with an empty one) no connection is made and the client
    /// can only be closed.
    pub fn password<P: Into<String>>(mut self, password: P) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Timeout for the default dialer. Ignored when a custom dial function is set.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Subscriber that receives the client's tracing events, instead of the current default.
    pub fn dispatch<S: Into<Dispatch>>(mut self, dispatch: S) -> Self {
        self.dispatch = Some(dispatch.into());
        self
    }

    pub(crate) fn connect_timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT)
    }

    pub(crate) fn take_password(&mut self) -> Option<String> {
        self.password.take().filter(|password| !password.is_empty())
    }
}

impl<D> Default for Options<D> {
    fn default() -> Self {
        Options::new()
    }
}

impl<D: Clone> Clone for Options<D> {
    fn clone(&self) -> Self {
        Options {
            dial: self.dial.clone(),
            password: self.password.clone(),
            timeout: self.timeout,
            dispatch: self.dispatch.clone(),
        }
    }
}

impl<D> fmt::Debug for Options<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("dial", &self.dial.as_ref().map(|_| "custom"))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("dispatch", &self.dispatch.is_some())
            .finish()
    }
}

/// Runs `f` with `dispatch` as the default subscriber, if one was configured.
#[cfg(feature = "sync")]
pub(crate) fn with_dispatch<T>(dispatch: Option<&Dispatch>, f: impl FnOnce() -> T) -> T {
    match dispatch {
        Some(dispatch) => tracing::dispatcher::with_default(dispatch, f),
        None => f(),
    }
}
