//! # netconf-xpath
//!
//! A Rust client library for NETCONF ([RFC 6241](https://datatracker.ietf.org/doc/html/rfc6241))
//! addressed with XPath expressions.
//!
//! NETCONF is a network management protocol defined by the IETF. It provides
//! mechanisms to install, manipulate, and delete the configuration of network
//! devices. Its operations are realized as Remote Procedure Calls (RPCs)
//! encoded in XML and carried over SSH.
//!
//! This crate speaks the protocol through dynamic document trees instead of
//! per-device structs: you address data with an XPath, and the library
//! synthesizes the request documents, correlates replies by `message-id`,
//! and prunes responses down to the node you asked for.
//!
//! ## Features
//!
//! - **XPath addressing**: strict paths (`/a/b[name='x']`) are resolved
//!   directly; wildcard paths (`//`, `*`) are resolved against a schema
//!   skeleton fetched from the server
//! - **Concurrent requests**: a shared demultiplexer routes replies by
//!   `message-id`, so many RPCs can be in flight on one session
//! - **Notification streams**: subscriptions yield a lazy, cancellable
//!   sequence of events with no idle timeout
//! - **NMDA `get-data`**: configuration, operational state and schema
//!   skeleton retrieval with XPath filters
//!
//! ## Quick Start
//!
//! ```ignore
//! use netconf_xpath::{Client, ConnectParams};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), netconf_xpath::Error> {
//! let params = ConnectParams::new("192.168.1.1", "admin", "password").port(830);
//! let mut client = Client::new(params);
//! let interfaces = client.get_data("/interfaces", None).await?;
//! println!("{}", serde_json::to_string_pretty(&interfaces.result).unwrap());
//! client.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! *Note: connecting over SSH requires the `ssh` feature (enabled by
//! default).*
//!
//! ## Cargo Features
//!
//! - **`ssh`** (default): SSH transport using the russh library. Without
//!   it, attach any duplex byte stream with [`Client::from_session`].

use log::debug;

use crate::resolver::KeyPath;
use crate::value::{deep_merge, ATTRIBUTES};

pub mod config;
pub mod error;
pub mod frame;
pub mod resolver;
pub mod session;
pub mod stream;
pub mod transport;
pub mod value;
pub mod xml;

pub use config::{ConnectParams, DebugLevel, DebugSink, Namespace};
pub use error::{Error, RpcError, RpcErrorInfo};
pub use resolver::resolve_xpath;
pub use session::{Envelope, Session, SessionOptions};
pub use stream::{Canceler, Replies};
pub use value::{Map, Value};

/// Which view of the datastore a [`Client::get_data`] call retrieves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    /// Configuration data via NMDA `get-data` with `config-filter=true`.
    Config,
    /// Operational state via NMDA `get-data` with `config-filter=false`.
    State,
    /// A one-level schema skeleton via `get-data` with `max-depth=1`.
    Schema,
}

/// What a subscription listens to: an XPath filter or a named stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionTarget {
    XPath(String),
    Stream(String),
}

enum EditOperation<'a> {
    Merge,
    Create { before_key: Option<&'a str> },
    Delete,
    CreateListItems(&'a [Value]),
    DeleteListItems(&'a [Value]),
}

/// A client for a NETCONF server
///
/// The client is lazy: the SSH session is opened by the first call that
/// needs I/O and reused afterwards. Every operation returns the
/// [`Envelope`] of the reply; subscriptions return the [`Replies`]
/// sequence instead.
pub struct Client {
    params: ConnectParams,
    session: Option<Session>,
}

impl Client {
    /// Creates a client. No I/O happens until the first operation.
    pub fn new(params: ConnectParams) -> Client {
        Client {
            params,
            session: None,
        }
    }

    /// Attaches an already-open session, e.g. over a custom transport.
    pub fn from_session(params: ConnectParams, session: Session) -> Client {
        Client {
            params,
            session: Some(session),
        }
    }

    async fn session(&mut self) -> Result<&Session, Error> {
        if self.session.is_none() {
            self.session = Some(self.open_session().await?);
        }
        match &self.session {
            Some(session) => Ok(session),
            None => Err(Error::NotOpened),
        }
    }

    #[cfg(feature = "ssh")]
    async fn open_session(&self) -> Result<Session, Error> {
        let transport = transport::ssh::SshTransport::connect(
            &self.params.host,
            self.params.port,
            &self.params.user,
            &self.params.password,
        )
        .await?;
        Session::open(
            transport,
            SessionOptions {
                ignore_attributes: self.params.ignore_attributes,
                debug: self.params.debug.clone(),
            },
        )
        .await
    }

    #[cfg(not(feature = "ssh"))]
    async fn open_session(&self) -> Result<Session, Error> {
        Err(Error::Transport(
            "built without the `ssh` feature; attach a transport with Client::from_session"
                .to_owned(),
        ))
    }

    /// The server hello: capabilities and `session-id`. Opens the session
    /// on first use.
    pub async fn hello(&mut self) -> Result<Envelope, Error> {
        let session = self.session().await?;
        Ok(session.hello_envelope().clone())
    }

    /// Retrieves data addressed by `xpath`: a plain `get` with an XPath
    /// filter, or an NMDA `get-data` when `kind` selects a datastore view.
    /// The reply is unwrapped to `rpc-reply.data` and pruned down to the
    /// addressed node.
    pub async fn get_data(
        &mut self,
        xpath: &str,
        kind: Option<DataKind>,
    ) -> Result<Envelope, Error> {
        let body = get_data_body(xpath, kind);
        let session = self.session().await?;
        let envelope = session.send_request(body, false).await?.first().await?;
        let mut data = envelope
            .result
            .get("rpc-reply")
            .and_then(|reply| reply.get("data"))
            .cloned()
            .unwrap_or(Value::Null);
        if kind == Some(DataKind::Schema) {
            if let Some(map) = data.as_map_mut() {
                map.shift_remove(ATTRIBUTES);
            }
        }
        Ok(Envelope {
            xml: envelope.xml,
            result: resolver::resolve_xpath(&data, xpath),
        })
    }

    /// Merges `values` into every node addressed by `xpath` in the running
    /// datastore.
    pub async fn edit_config_merge(
        &mut self,
        xpath: &str,
        values: &Value,
    ) -> Result<Envelope, Error> {
        self.edit_config(xpath, values, EditOperation::Merge).await
    }

    /// As merge, marking the addressed node with `nc:operation="create"`.
    /// With `before_key`, the new entry is ordered before that key via
    /// `yang:insert`.
    pub async fn edit_config_create(
        &mut self,
        xpath: &str,
        values: &Value,
        before_key: Option<&str>,
    ) -> Result<Envelope, Error> {
        self.edit_config(xpath, values, EditOperation::Create { before_key })
            .await
    }

    /// As merge, marking the addressed node with `nc:operation="delete"`.
    pub async fn edit_config_delete(
        &mut self,
        xpath: &str,
        values: &Value,
    ) -> Result<Envelope, Error> {
        self.edit_config(xpath, values, EditOperation::Delete).await
    }

    /// Replaces the addressed leaf-list with `items`, each marked
    /// `nc:operation="create"`.
    pub async fn edit_config_create_list_items(
        &mut self,
        xpath: &str,
        items: &[Value],
    ) -> Result<Envelope, Error> {
        self.edit_config(xpath, &Value::Null, EditOperation::CreateListItems(items))
            .await
    }

    /// Replaces the addressed leaf-list with `items`, each marked
    /// `nc:operation="delete"`.
    pub async fn edit_config_delete_list_items(
        &mut self,
        xpath: &str,
        items: &[Value],
    ) -> Result<Envelope, Error> {
        self.edit_config(xpath, &Value::Null, EditOperation::DeleteListItems(items))
            .await
    }

    async fn edit_config(
        &mut self,
        xpath: &str,
        values: &Value,
        operation: EditOperation<'_>,
    ) -> Result<Envelope, Error> {
        if self.params.read_only {
            return Err(Error::ReadOnly);
        }
        resolver::validate_build_xpath(xpath)?;
        let (mut target, matched) = self.resolve_edit_targets(xpath).await?;
        if matched.is_empty() {
            return Err(Error::EmptyResolution);
        }
        if matched.len() > 1 && !self.params.allow_multiple_edit {
            return Err(Error::MultipleEdit);
        }
        for path in &matched {
            if let Some(node) = target.get_path_mut(path) {
                apply_edit(node, values, &operation);
            }
        }
        let body = edit_config_body(target);
        let session = self.session().await?;
        let envelope = session.send_request(body, false).await?.first().await?;
        let acknowledged = envelope
            .result
            .get("rpc-reply")
            .map(|reply| reply.get("ok").is_some())
            .unwrap_or(false);
        if !acknowledged {
            return Err(Error::MissingOk);
        }
        Ok(envelope)
    }

    /// Resolves an XPath into an edit target: directly for strict paths
    /// (guessing a namespace from the server when none is declared), or
    /// guided by a freshly fetched schema skeleton otherwise.
    async fn resolve_edit_targets(&mut self, xpath: &str) -> Result<(Value, Vec<KeyPath>), Error> {
        if let Some(segments) = resolver::strict_segments(xpath) {
            let namespaces = if !self.params.namespaces.is_empty() {
                self.params.namespace_attributes()
            } else if let Some(uri) = self.guess_namespace(&segments[0].name).await {
                vec![("xmlns".to_owned(), uri)]
            } else {
                Vec::new()
            };
            let mut target = Value::map();
            let matched = resolver::build_strict(&mut target, &segments, &namespaces);
            return Ok((target, matched));
        }
        let schema = self.fetch_schema().await?;
        let (target, matched) =
            resolver::build_with_schema(schema, xpath, &self.params.namespace_attributes());
        Ok((target, matched))
    }

    async fn fetch_schema(&mut self) -> Result<Value, Error> {
        let envelope = self.get_data("/", Some(DataKind::Schema)).await?;
        match &envelope.result {
            Value::Map(map) if !map.is_empty() => Ok(envelope.result),
            _ => Err(Error::EmptySchema),
        }
    }

    /// Asks the server for the top-level element named by the first path
    /// segment and reads its default namespace. Yields nothing on any
    /// failure; edits then go out without a namespace.
    async fn guess_namespace(&mut self, element: &str) -> Option<String> {
        let xpath = format!("/{}", element);
        let envelope = match self.get_data(&xpath, None).await {
            Ok(envelope) => envelope,
            Err(error) => {
                debug!("namespace probe for {} failed: {}", xpath, error);
                return None;
            }
        };
        envelope
            .result
            .get(element)?
            .get(ATTRIBUTES)?
            .get("xmlns")?
            .as_str()
            .map(str::to_owned)
    }

    /// Invokes an arbitrary RPC built from a strict XPath, deep-merging
    /// `values` into the innermost element.
    pub async fn rpc(&mut self, xpath: &str, values: &Value) -> Result<Envelope, Error> {
        if self.params.read_only {
            return Err(Error::ReadOnly);
        }
        resolver::validate_build_xpath(xpath)?;
        let segments = resolver::strict_segments(xpath).ok_or_else(|| {
            Error::InvalidXPath("RPC invocation requires a path without wildcards".to_owned())
        })?;
        let mut target = Value::map();
        let matched =
            resolver::build_strict(&mut target, &segments, &self.params.namespace_attributes());
        for path in &matched {
            if let Some(node) = target.get_path_mut(path) {
                deep_merge(node, values);
            }
        }
        let session = self.session().await?;
        session.send_request(target, false).await?.first().await
    }

    /// Creates a NETCONF notification subscription. The returned sequence
    /// yields the OK reply envelope, then each notification as it arrives,
    /// and completes when cancelled via its [`Canceler`] or dropped.
    pub async fn subscription(&mut self, target: SubscriptionTarget) -> Result<Replies, Error> {
        let mut attributes = Map::new();
        attributes.insert(
            "xmlns".to_owned(),
            Value::Str(xml::NOTIFICATION_NS.to_owned()),
        );
        let mut create = Map::new();
        create.insert(ATTRIBUTES.to_owned(), Value::Map(attributes));
        match target {
            SubscriptionTarget::XPath(xpath) => {
                let mut filter_attributes = Map::new();
                filter_attributes.insert("type".to_owned(), Value::Str("xpath".to_owned()));
                filter_attributes.insert("select".to_owned(), Value::Str(xpath));
                let mut filter = Map::new();
                filter.insert(ATTRIBUTES.to_owned(), Value::Map(filter_attributes));
                create.insert("filter".to_owned(), Value::Map(filter));
            }
            SubscriptionTarget::Stream(stream) => {
                create.insert("stream".to_owned(), Value::Str(stream));
            }
        }
        let mut body = Map::new();
        body.insert("create-subscription".to_owned(), Value::Map(create));
        let session = self.session().await?;
        session.send_request(Value::Map(body), true).await
    }

    /// Orderly session teardown. Fails with [`Error::NotOpened`] when no
    /// session was ever opened; closing an already-closed session is a
    /// no-op.
    pub async fn close(&mut self) -> Result<(), Error> {
        match &self.session {
            Some(session) => session.close().await,
            None => Err(Error::NotOpened),
        }
    }
}

fn get_data_body(xpath: &str, kind: Option<DataKind>) -> Value {
    let mut root = Map::new();
    match kind {
        None => {
            let mut filter_attributes = Map::new();
            filter_attributes.insert("type".to_owned(), Value::Str("xpath".to_owned()));
            filter_attributes.insert("select".to_owned(), Value::Str(xpath.to_owned()));
            let mut filter = Map::new();
            filter.insert(ATTRIBUTES.to_owned(), Value::Map(filter_attributes));
            let mut get = Map::new();
            get.insert("filter".to_owned(), Value::Map(filter));
            root.insert("get".to_owned(), Value::Map(get));
        }
        Some(kind) => {
            let mut attributes = Map::new();
            attributes.insert("xmlns".to_owned(), Value::Str(xml::NMDA_NS.to_owned()));
            attributes.insert(
                "xmlns:ds".to_owned(),
                Value::Str(xml::DATASTORES_NS.to_owned()),
            );
            let mut get_data = Map::new();
            get_data.insert(ATTRIBUTES.to_owned(), Value::Map(attributes));
            get_data.insert(
                "datastore".to_owned(),
                Value::Str("ds:operational".to_owned()),
            );
            get_data.insert("xpath-filter".to_owned(), Value::Str(xpath.to_owned()));
            match kind {
                DataKind::Schema => {
                    get_data.insert("max-depth".to_owned(), Value::Int(1));
                }
                DataKind::Config | DataKind::State => {
                    get_data.insert(
                        "config-filter".to_owned(),
                        Value::Bool(kind == DataKind::Config),
                    );
                    get_data.insert(
                        "with-defaults".to_owned(),
                        Value::Str("report-all".to_owned()),
                    );
                }
            }
            root.insert("get-data".to_owned(), Value::Map(get_data));
        }
    }
    Value::Map(root)
}

fn edit_config_body(config: Value) -> Value {
    let mut target = Map::new();
    target.insert("running".to_owned(), Value::Null);
    let mut edit = Map::new();
    edit.insert("target".to_owned(), Value::Map(target));
    edit.insert("config".to_owned(), config);
    let mut root = Map::new();
    root.insert("edit-config".to_owned(), Value::Map(edit));
    Value::Map(root)
}

fn apply_edit(node: &mut Value, values: &Value, operation: &EditOperation<'_>) {
    match operation {
        EditOperation::CreateListItems(items) => {
            *node = Value::List(items.iter().map(|item| list_entry(item, "create")).collect());
        }
        EditOperation::DeleteListItems(items) => {
            *node = Value::List(items.iter().map(|item| list_entry(item, "delete")).collect());
        }
        EditOperation::Merge => deep_merge(node, values),
        EditOperation::Create { before_key } => {
            deep_merge(node, values);
            set_operation_marker(node, "create");
            if let Some(key) = before_key {
                set_insert_attributes(node, key);
            }
        }
        EditOperation::Delete => {
            deep_merge(node, values);
            set_operation_marker(node, "delete");
        }
    }
}

fn list_entry(item: &Value, marker: &str) -> Value {
    let mut attributes = Map::new();
    attributes.insert("xmlns:nc".to_owned(), Value::Str(xml::BASE_NS.to_owned()));
    attributes.insert("nc:operation".to_owned(), Value::Str(marker.to_owned()));
    let mut entry = Map::new();
    entry.insert(ATTRIBUTES.to_owned(), Value::Map(attributes));
    entry.insert(value::TEXT.to_owned(), item.clone());
    Value::Map(entry)
}

fn set_operation_marker(node: &mut Value, marker: &str) {
    with_attributes(node, &[
        ("xmlns:nc", xml::BASE_NS),
        ("nc:operation", marker),
    ]);
}

fn set_insert_attributes(node: &mut Value, before_key: &str) {
    with_attributes(node, &[
        ("xmlns:yang", xml::YANG_NS),
        ("yang:insert", "before"),
        ("yang:key", before_key),
    ]);
}

fn with_attributes(node: &mut Value, attributes: &[(&str, &str)]) {
    let Some(map) = node.as_map_mut() else { return };
    let attrs = map
        .entry(ATTRIBUTES.to_owned())
        .or_insert_with(Value::map);
    if let Some(attrs) = attrs.as_map_mut() {
        for (key, value) in attributes {
            attrs.insert((*key).to_owned(), Value::Str((*value).to_owned()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_body_uses_a_plain_get_with_an_xpath_filter() {
        let body = get_data_body("/interfaces", None);
        let xml = xml::encode(&body).unwrap();
        assert!(xml.contains("<get><filter type=\"xpath\" select=\"/interfaces\"/></get>"));
    }

    #[test]
    fn get_body_selects_nmda_views() {
        let xml = xml::encode(&get_data_body("/a", Some(DataKind::Config))).unwrap();
        assert!(xml.contains("urn:ietf:params:xml:ns:yang:ietf-netconf-nmda"));
        assert!(xml.contains("<datastore>ds:operational</datastore>"));
        assert!(xml.contains("<config-filter>true</config-filter>"));
        assert!(xml.contains("<with-defaults>report-all</with-defaults>"));

        let xml = xml::encode(&get_data_body("/a", Some(DataKind::State))).unwrap();
        assert!(xml.contains("<config-filter>false</config-filter>"));

        let xml = xml::encode(&get_data_body("/a", Some(DataKind::Schema))).unwrap();
        assert!(xml.contains("<max-depth>1</max-depth>"));
        assert!(!xml.contains("config-filter"));
    }

    #[test]
    fn edit_body_targets_the_running_datastore() {
        let mut config = Map::new();
        config.insert("top".to_owned(), Value::map());
        let xml = xml::encode(&edit_config_body(Value::Map(config))).unwrap();
        assert!(xml.contains("<edit-config><target><running/></target><config><top/></config></edit-config>"));
    }

    #[test]
    fn create_marks_the_node_and_orders_it() {
        let mut node = Value::map();
        apply_edit(
            &mut node,
            &Value::map(),
            &EditOperation::Create {
                before_key: Some("eth0"),
            },
        );
        let attrs = node.get(ATTRIBUTES).unwrap();
        assert_eq!(
            attrs.get("nc:operation"),
            Some(&Value::Str("create".into()))
        );
        assert_eq!(
            attrs.get("xmlns:nc"),
            Some(&Value::Str(xml::BASE_NS.into()))
        );
        assert_eq!(attrs.get("yang:insert"), Some(&Value::Str("before".into())));
        assert_eq!(attrs.get("yang:key"), Some(&Value::Str("eth0".into())));
    }

    #[test]
    fn list_edits_replace_the_target_with_marked_entries() {
        let mut node = Value::map();
        let items = vec![Value::Str("a".into()), Value::Str("b".into())];
        apply_edit(&mut node, &Value::Null, &EditOperation::DeleteListItems(&items));
        let entries = node.as_list().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0].get(ATTRIBUTES).unwrap().get("nc:operation"),
            Some(&Value::Str("delete".into()))
        );
        assert_eq!(entries[1].get(value::TEXT), Some(&Value::Str("b".into())));
    }
}
