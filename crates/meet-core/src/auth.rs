use tokio::sync::watch;

/// Reactive authentication signal watched by the connection manager.
///
/// The HTTP/session layer owns the real credentials; all the connection core
/// needs is a boolean it can observe. Hold the `AuthGate` on the auth side
/// and hand out receivers via [`AuthGate::subscribe`].
pub struct AuthGate {
    tx: watch::Sender<bool>,
}

impl AuthGate {
    pub fn new(initially_authenticated: bool) -> Self {
        let (tx, _) = watch::channel(initially_authenticated);
        Self { tx }
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.tx.send_if_modified(|current| {
            let changed = *current != authenticated;
            *current = authenticated;
            changed
        });
    }

    pub fn is_authenticated(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Derive the WebSocket base URL from the HTTP backend base URL.
///
/// Swaps the scheme (`http → ws`, `https → wss`) and strips any trailing
/// slash. A URL without a recognized scheme is passed through unchanged.
pub fn websocket_base_url(backend_url: &str) -> String {
    let trimmed = backend_url.trim().trim_end_matches('/');
    if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        trimmed.to_string()
    }
}

/// Full channel endpoint for one room: `<ws-base>/meeting/<roomId>`.
pub fn meeting_channel_url(backend_url: &str, room_id: &str) -> String {
    format!("{}/meeting/{}", websocket_base_url(backend_url), room_id)
}
