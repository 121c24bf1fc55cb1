//! Plugin process entry point.

use std::io::{self, Write};
use std::net::TcpListener;
use std::sync::Arc;

use tracing::info;

use wflow_plugin_protocol::handshake::{Announcement, HandshakeConfig, Network};
use wflow_plugin_protocol::{Connection, PRIMARY_CHANNEL, Role, Stream};

use crate::error::SdkError;
use crate::provider::PluginProvider;
use crate::server::PluginServer;

const SERVE_TARGET: &str = "wflow_plugin_sdk::serve";

/// Serves `provider` to the host that launched this process.
///
/// Binds a loopback listener, prints the handshake line on stdout, accepts
/// the host's connection and blocks until it closes. Stdout must not be
/// written to before this call; the host reads the first line as the
/// handshake.
///
/// # Errors
///
/// Returns [`SdkError::NotLaunchedByHost`] or [`SdkError::CookieMismatch`]
/// when the environment was not prepared by a host, and an I/O error when
/// the listener or announcement fails.
pub fn serve(provider: impl PluginProvider + 'static) -> Result<(), SdkError> {
    let handshake = HandshakeConfig::default();
    check_environment(&handshake, |key| std::env::var(key).ok())?;
    let mut stdout = io::stdout().lock();
    serve_with(provider, &handshake, &mut stdout)
}

/// Like [`serve`], writing the announcement to `out` and skipping the
/// environment check.
///
/// # Errors
///
/// Returns an [`SdkError`] when the listener or announcement fails.
pub fn serve_with(
    provider: impl PluginProvider + 'static,
    handshake: &HandshakeConfig,
    out: &mut dyn Write,
) -> Result<(), SdkError> {
    let name = provider.manifest().name;
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .map_err(|source| SdkError::listener("bind listener", source))?;
    let address = listener
        .local_addr()
        .map_err(|source| SdkError::listener("read listener address", source))?;

    let announcement = Announcement::for_config(handshake, Network::Tcp, address.to_string());
    writeln!(out, "{}", announcement.to_line())
        .and_then(|()| out.flush())
        .map_err(|source| SdkError::Announce {
            source: Arc::new(source),
        })?;

    let (stream, peer) = listener
        .accept()
        .map_err(|source| SdkError::listener("accept host connection", source))?;
    stream
        .set_nodelay(true)
        .map_err(|source| SdkError::listener("configure host connection", source))?;
    let connection = Connection::start(Stream::Tcp(stream), Role::Plugin, name.clone())
        .map_err(|source| SdkError::listener("start connection", source))?;
    info!(target: SERVE_TARGET, plugin = %name, %peer, "serving host");

    let server = PluginServer::new(provider).with_connection(connection.clone());
    connection.serve(PRIMARY_CHANNEL, Arc::new(server));
    connection.wait_closed();
    info!(target: SERVE_TARGET, plugin = %name, "host disconnected");
    Ok(())
}

/// Verifies the magic cookie the host passes through the environment.
///
/// # Errors
///
/// Returns [`SdkError::NotLaunchedByHost`] when the variable is missing and
/// [`SdkError::CookieMismatch`] when it holds another value.
pub fn check_environment(
    handshake: &HandshakeConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), SdkError> {
    let key = handshake.cookie_key();
    match lookup(key) {
        None => Err(SdkError::NotLaunchedByHost {
            key: key.to_owned(),
        }),
        Some(value) if value != handshake.cookie_value() => Err(SdkError::CookieMismatch {
            key: key.to_owned(),
        }),
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpStream;
    use std::thread;

    use rstest::rstest;

    use wflow_plugin_protocol::handshake::MAGIC_COOKIE_VALUE;
    use wflow_plugin_protocol::messages::{ManifestInfo, plugin_method};

    use super::*;

    struct Named;

    impl PluginProvider for Named {
        fn manifest(&self) -> ManifestInfo {
            ManifestInfo {
                name: String::from("named"),
                version: String::from("0.1.0"),
                ..ManifestInfo::default()
            }
        }
    }

    #[rstest]
    #[case::missing(None, "not set")]
    #[case::wrong(Some("nope"), "does not match")]
    fn environment_must_come_from_a_host(#[case] cookie: Option<&str>, #[case] expected: &str) {
        let error = check_environment(&HandshakeConfig::default(), |_| cookie.map(str::to_owned))
            .expect_err("must fail");
        assert!(error.to_string().contains(expected), "got {error}");
    }

    #[test]
    fn matching_cookie_passes() {
        check_environment(&HandshakeConfig::default(), |_| {
            Some(MAGIC_COOKIE_VALUE.to_owned())
        })
        .expect("cookie accepted");
    }

    #[test]
    fn announces_then_serves_until_the_host_closes() {
        let (line_tx, line_rx) = std::sync::mpsc::channel::<String>();
        let server = thread::spawn(move || {
            let mut out = LineSink(line_tx, Vec::new());
            serve_with(Named, &HandshakeConfig::default(), &mut out)
        });

        let line = line_rx.recv().expect("announcement");
        let announcement = Announcement::parse(&line).expect("parse");
        announcement
            .verify(&HandshakeConfig::default())
            .expect("verify");
        let stream = TcpStream::connect(&announcement.address).expect("dial");
        let connection =
            Connection::start(Stream::Tcp(stream), Role::Host, "test").expect("connection");
        let manifest: ManifestInfo = connection
            .channel(PRIMARY_CHANNEL)
            .call(plugin_method::GET_MANIFEST, &serde_json::json!({}))
            .expect("manifest");
        assert_eq!(manifest.name, "named");

        connection.close();
        server.join().expect("join").expect("served");
    }

    /// Forwards each completed line to a channel.
    struct LineSink(std::sync::mpsc::Sender<String>, Vec<u8>);

    impl Write for LineSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.1.extend_from_slice(buf);
            while let Some(end) = self.1.iter().position(|byte| *byte == b'\n') {
                let line: Vec<u8> = self.1.drain(..=end).collect();
                drop(self.0.send(String::from_utf8_lossy(&line).into_owned()));
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
