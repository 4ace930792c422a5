//! Turns process signals into sync cancellation.
//!
//! The first SIGINT, SIGTERM or SIGHUP cancels the returned token; the sync
//! stops at its next checkpoint and the local data stays as it was. Any
//! further signal exits at once with the conventional `128 + signo` status.

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    Interrupt,
    Terminate,
    Hangup,
}

impl Signal {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Signal::Interrupt => "SIGINT",
            Signal::Terminate => "SIGTERM",
            Signal::Hangup => "SIGHUP",
        }
    }

    /// Shell-style status for a process killed by this signal.
    pub(crate) fn exit_code(self) -> i32 {
        let signo = match self {
            Signal::Hangup => 1,
            Signal::Interrupt => 2,
            Signal::Terminate => 15,
        };
        128 + signo
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Response {
    Cancel,
    Exit(i32),
}

/// What to do about `signal` given how many signals came before it.
fn respond(signal: Signal, earlier: u32) -> Response {
    if earlier == 0 {
        Response::Cancel
    } else {
        Response::Exit(signal.exit_code())
    }
}

/// Signal streams, registered up front so a registration failure surfaces
/// to the caller.
struct Listener {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl Listener {
    fn register() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            Ok(Self {
                terminate: signal(SignalKind::terminate())?,
                hangup: signal(SignalKind::hangup())?,
            })
        }
        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    async fn next(&mut self) -> std::io::Result<Signal> {
        #[cfg(unix)]
        {
            tokio::select! {
                r = tokio::signal::ctrl_c() => r.map(|_| Signal::Interrupt),
                _ = self.terminate.recv() => Ok(Signal::Terminate),
                _ = self.hangup.recv() => Ok(Signal::Hangup),
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.map(|_| Signal::Interrupt)
        }
    }
}

/// Start listening for shutdown signals. Must be called inside a tokio
/// runtime.
pub(crate) fn install_signal_handler() -> std::io::Result<CancellationToken> {
    let mut listener = Listener::register()?;
    let token = CancellationToken::new();
    let cancel = token.clone();

    tokio::spawn(async move {
        let mut received = 0;
        loop {
            let signal = match listener.next().await {
                Ok(signal) => signal,
                Err(e) => {
                    tracing::warn!("Stopped listening for shutdown signals: {}", e);
                    return;
                }
            };
            match respond(signal, received) {
                Response::Cancel => {
                    tracing::info!(
                        "Received {}, cancelling sync; local data is left as it was",
                        signal.name()
                    );
                    tracing::info!("Press Ctrl+C again to force exit");
                    cancel.cancel();
                }
                Response::Exit(code) => {
                    tracing::warn!("Received {} again, exiting", signal.name());
                    std::process::exit(code);
                }
            }
            received += 1;
        }
    });

    Ok(token)
}
