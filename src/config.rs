//! Connection parameters

use std::fmt;
use std::sync::Arc;

/// Severity attached to messages handed to a [`DebugSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugLevel {
    Info,
    Debug,
    Trace,
}

/// Optional callback receiving the session's diagnostic messages in
/// addition to the `log` facade.
pub type DebugSink = Arc<dyn Fn(&str, DebugLevel) + Send + Sync>;

/// An XML namespace declared for edit targets and RPC invocations,
/// injected into the first element built from an XPath.
#[derive(Debug, Clone, PartialEq)]
pub enum Namespace {
    /// Default namespace: `xmlns="…"`.
    Default(String),
    /// Aliased namespace: `xmlns:alias="…"`.
    Alias(String, String),
}

/// Parameters for connecting to a NETCONF server.
#[derive(Clone)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Refuse every write operation.
    pub read_only: bool,
    /// Allow an edit to address more than one schema branch.
    pub allow_multiple_edit: bool,
    /// Drop `$` attribute sub-mappings while decoding.
    pub ignore_attributes: bool,
    pub namespaces: Vec<Namespace>,
    pub debug: Option<DebugSink>,
}

impl ConnectParams {
    /// Parameters for `host` on the standard NETCONF port 830.
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> ConnectParams {
        ConnectParams {
            host: host.into(),
            port: 830,
            user: user.into(),
            password: password.into(),
            read_only: false,
            allow_multiple_edit: false,
            ignore_attributes: false,
            namespaces: Vec::new(),
            debug: None,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn allow_multiple_edit(mut self, allow: bool) -> Self {
        self.allow_multiple_edit = allow;
        self
    }

    pub fn ignore_attributes(mut self, ignore: bool) -> Self {
        self.ignore_attributes = ignore;
        self
    }

    pub fn namespace(mut self, namespace: Namespace) -> Self {
        self.namespaces.push(namespace);
        self
    }

    pub fn debug(mut self, sink: DebugSink) -> Self {
        self.debug = Some(sink);
        self
    }

    /// Declared namespaces as XML attribute pairs.
    pub(crate) fn namespace_attributes(&self) -> Vec<(String, String)> {
        self.namespaces
            .iter()
            .map(|namespace| match namespace {
                Namespace::Default(uri) => ("xmlns".to_owned(), uri.clone()),
                Namespace::Alias(alias, uri) => (format!("xmlns:{}", alias), uri.clone()),
            })
            .collect()
    }
}

impl fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("read_only", &self.read_only)
            .field("allow_multiple_edit", &self.allow_multiple_edit)
            .field("ignore_attributes", &self.ignore_attributes)
            .field("namespaces", &self.namespaces)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_attributes_cover_both_forms() {
        let params = ConnectParams::new("router", "admin", "admin")
            .namespace(Namespace::Default("http://x".to_owned()))
            .namespace(Namespace::Alias("if".to_owned(), "http://if".to_owned()));
        assert_eq!(
            params.namespace_attributes(),
            vec![
                ("xmlns".to_owned(), "http://x".to_owned()),
                ("xmlns:if".to_owned(), "http://if".to_owned()),
            ]
        );
    }

    #[test]
    fn debug_output_redacts_the_password() {
        let params = ConnectParams::new("router", "admin", "secret");
        assert!(!format!("{:?}", params).contains("secret"));
    }
}
