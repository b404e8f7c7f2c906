//! Replica-set client façade — a single connection-like handle that
//! routes each operation to the right member of the set.
//!
//! Writes always go to the primary. Reads go to the primary too, unless
//! the caller flags the query secondary-ok, in which case up to three
//! rotating secondaries are tried before falling back to the primary.
//! The façade keeps at most one bound primary connection and one bound
//! secondary connection, rebinding when the monitor's selection moves or
//! a connection dies, and replays cached credentials onto every
//! connection it opens.
//!
//! The pipelined path (`say` now, `recv` later) keeps enough state to
//! re-route a failed exchange: `check_response` inspects the outcome,
//! invalidates whichever member answered badly, and tells the caller
//! whether re-sending is worthwhile.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use drover_proto::defaults::{PIPELINE_MAX_RETRIES, SECONDARY_READ_ATTEMPTS};
use drover_proto::error::NOT_PRIMARY_OR_SECONDARY;
use drover_proto::message::{error_code, has_err_field, QUERY_SECONDARY_OK};
use drover_proto::{Cursor, Document, HostPort, Message, OpCode, Reply, RsError, RsResult};

use crate::conn::{Connector, DocClient};
use crate::monitor::ReplicaSetMonitor;
use crate::registry::MonitorRegistry;

/// Credentials cached for replay onto newly opened connections.
struct AuthInfo {
    db: String,
    user: String,
    pwd: String,
    digest: bool,
}

/// Which bound connection the last pipelined send went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum LastClient {
    #[default]
    None,
    Primary,
    Secondary,
}

/// State of the pipelined send/receive exchange.
#[derive(Default)]
struct PipelineState {
    last_op: Option<OpCode>,
    secondary_ok: bool,
    retries: u32,
    last_client: LastClient,
}

/// Outcome of [`ReplicaSetClient::check_response`].
#[derive(Debug, Clone, Default)]
pub struct ResponseCheck {
    /// The caller should re-send the message with `is_retry = true`.
    pub retry: bool,
    /// Address the inspected response came from.
    pub target_host: Option<String>,
}

/// A connection-like handle over one replica set.
pub struct ReplicaSetClient {
    monitor: Arc<ReplicaSetMonitor>,
    connector: Arc<dyn Connector>,
    primary_host: Option<HostPort>,
    primary: Option<Arc<dyn DocClient>>,
    secondary_host: Option<HostPort>,
    secondary: Option<Arc<dyn DocClient>>,
    auths: Vec<AuthInfo>,
    pipeline: PipelineState,
    so_timeout: Option<Duration>,
}

impl ReplicaSetClient {
    /// Join the shared monitor for `name`, creating it from `seeds` if
    /// this is the first client of the set in the process.
    ///
    /// `so_timeout` is applied to every data connection this client opens.
    pub async fn new(
        registry: &Arc<MonitorRegistry>,
        name: &str,
        seeds: &[HostPort],
        so_timeout: Option<Duration>,
    ) -> RsResult<Self> {
        let monitor = registry.get_or_create(name, seeds).await?;
        Ok(Self {
            monitor,
            connector: registry.connector(),
            primary_host: None,
            primary: None,
            secondary_host: None,
            secondary: None,
            auths: Vec::new(),
            pipeline: PipelineState::default(),
            so_timeout,
        })
    }

    pub fn monitor(&self) -> &Arc<ReplicaSetMonitor> {
        &self.monitor
    }

    pub fn server_address(&self) -> String {
        self.monitor.server_address()
    }

    /// Probe-style connect: binds the primary, reporting failure as
    /// `false` rather than an error.
    pub async fn connect(&mut self) -> bool {
        match self.check_primary().await {
            Ok(_) => true,
            Err(_) => {
                if self.primary.is_some() {
                    if let Some(host) = self.primary_host.clone() {
                        self.monitor.notify_primary_failure(&host);
                    }
                }
                false
            }
        }
    }

    /// Bind to the current primary, reusing the cached connection when it
    /// still points at the elected member and is alive.
    async fn check_primary(&mut self) -> RsResult<Arc<dyn DocClient>> {
        let selected = self.monitor.get_primary().await?;

        if let (Some(host), Some(conn)) = (&self.primary_host, &self.primary) {
            if *host == selected {
                if !conn.is_failed() {
                    return Ok(conn.clone());
                }
                self.monitor.notify_primary_failure(host);
            }
        }

        let host = self.monitor.get_primary().await?;
        let conn = match self.connector.connect(&host, self.so_timeout).await {
            Ok(conn) => conn,
            Err(e) => {
                self.monitor.notify_primary_failure(&host);
                warn!("can't connect to new replica set primary [{}]: {}", host, e);
                return Err(RsError::PrimaryConnectFailed);
            }
        };
        self.replay_auth(conn.as_ref()).await;
        self.primary_host = Some(host);
        self.primary = Some(conn.clone());
        Ok(conn)
    }

    /// Bind to a secondary, preferring the one already bound while the
    /// monitor still considers it usable.
    async fn check_secondary(&mut self) -> RsResult<Arc<dyn DocClient>> {
        let selected = self
            .monitor
            .get_secondary_from(self.secondary_host.as_ref())
            .await?;

        let host;
        if self.secondary_host.as_ref() == Some(&selected) && self.secondary.is_some() {
            let conn = self.secondary.clone().unwrap();
            if !conn.is_failed() {
                return Ok(conn);
            }
            self.monitor.notify_secondary_failure(&selected);
            host = self.monitor.get_secondary().await?;
        } else {
            host = selected;
        }

        let conn = match self.connector.connect(&host, self.so_timeout).await {
            Ok(conn) => conn,
            Err(e) => {
                // let the monitor rotate us somewhere else next attempt
                self.monitor.notify_secondary_failure(&host);
                debug!("can't connect to replica set secondary [{}]: {}", host, e);
                return Err(e);
            }
        };
        self.replay_auth(conn.as_ref()).await;
        self.secondary_host = Some(host);
        self.secondary = Some(conn.clone());
        Ok(conn)
    }

    /// Replay every cached credential onto a fresh connection. Individual
    /// failures are logged and skipped; stale passwords must not take
    /// down routing.
    async fn replay_auth(&self, conn: &dyn DocClient) {
        for auth in &self.auths {
            if let Err(e) = conn.auth(&auth.db, &auth.user, &auth.pwd, auth.digest).await {
                warn!(
                    "cached auth failed for set: {} db: {} user: {}: {}",
                    self.monitor.name(),
                    auth.db,
                    auth.user,
                    e
                );
            }
        }
    }

    /// Authenticate against the primary; on success the credentials are
    /// cached and replayed onto every connection opened later.
    pub async fn auth(&mut self, db: &str, user: &str, pwd: &str, digest: bool) -> RsResult<()> {
        let conn = self.check_primary().await?;
        conn.auth(db, user, pwd, digest).await?;
        self.auths.push(AuthInfo {
            db: db.to_string(),
            user: user.to_string(),
            pwd: pwd.to_string(),
            digest,
        });
        Ok(())
    }

    // ─── Simple routed operations ───────────────────────────────────────────

    pub async fn insert(&mut self, ns: &str, docs: &[Document]) -> RsResult<()> {
        self.check_primary().await?.insert(ns, docs).await
    }

    pub async fn update(
        &mut self,
        ns: &str,
        filter: &Document,
        update: &Document,
        upsert: bool,
        multi: bool,
    ) -> RsResult<()> {
        self.check_primary()
            .await?
            .update(ns, filter, update, upsert, multi)
            .await
    }

    pub async fn remove(&mut self, ns: &str, filter: &Document, just_one: bool) -> RsResult<()> {
        self.check_primary().await?.remove(ns, filter, just_one).await
    }

    /// Run a query, routing to rotating secondaries when the caller set
    /// the secondary-ok flag, with the primary as the final fallback.
    pub async fn query(&mut self, ns: &str, filter: &Document, flags: u32) -> RsResult<Cursor> {
        if flags & QUERY_SECONDARY_OK != 0 {
            for attempt in 0..SECONDARY_READ_ATTEMPTS {
                match self.query_secondary(ns, filter, flags).await {
                    Ok(cursor) => return Ok(cursor),
                    Err(e) => {
                        debug!(
                            "can't query replica set secondary attempt {}: {}",
                            attempt, e
                        );
                    }
                }
            }
        }

        self.check_primary().await?.query(ns, filter, flags).await
    }

    async fn query_secondary(
        &mut self,
        ns: &str,
        filter: &Document,
        flags: u32,
    ) -> RsResult<Cursor> {
        let conn = self.check_secondary().await?;
        let cursor = conn.query(ns, filter, flags).await?;
        self.check_secondary_query_result(cursor)
    }

    /// Inspect a secondary's result batch for the stepdown error. On a
    /// hit the member is invalidated and a retryable error raised so the
    /// surrounding loop moves to the next secondary.
    fn check_secondary_query_result(&mut self, cursor: Cursor) -> RsResult<Cursor> {
        let stepped_down = cursor
            .peek_error()
            .and_then(error_code)
            .map_or(false, |code| code == NOT_PRIMARY_OR_SECONDARY);
        if stepped_down {
            let host = self.secondary_host.clone();
            self.mark_not_secondary();
            warn!(
                "secondary {:?} is no longer secondary",
                host.map(|h| h.to_string())
            );
            return Err(RsError::NoLongerSecondary);
        }
        Ok(cursor)
    }

    pub async fn find_one(
        &mut self,
        ns: &str,
        filter: &Document,
        flags: u32,
    ) -> RsResult<Option<Document>> {
        if flags & QUERY_SECONDARY_OK != 0 {
            for attempt in 0..SECONDARY_READ_ATTEMPTS {
                let result = async {
                    let conn = self.check_secondary().await?;
                    conn.find_one(ns, filter, flags).await
                }
                .await;
                match result {
                    Ok(doc) => return Ok(doc),
                    Err(e) => {
                        debug!(
                            "can't findOne on replica set secondary attempt {}: {}",
                            attempt, e
                        );
                    }
                }
            }
        }

        self.check_primary().await?.find_one(ns, filter, flags).await
    }

    /// Paired send/receive with the same secondary-ok routing as
    /// [`query`](Self::query). Returns the reply and the address of the
    /// member that served it.
    pub async fn call(&mut self, msg: &Message) -> RsResult<(Reply, String)> {
        if msg.is_secondary_ok_query() {
            for attempt in 0..SECONDARY_READ_ATTEMPTS {
                let result = async {
                    let conn = self.check_secondary().await?;
                    let reply = conn.call(msg).await?;
                    Ok::<_, RsError>((reply, conn.server_address()))
                }
                .await;
                match result {
                    Ok(out) => return Ok(out),
                    Err(e) => {
                        debug!("can't call replica set secondary attempt {}: {}", attempt, e);
                    }
                }
            }
        }

        let conn = self.check_primary().await?;
        let reply = conn.call(msg).await?;
        Ok((reply, conn.server_address()))
    }

    // ─── Pipelined send/receive ─────────────────────────────────────────────

    /// Send without waiting for the reply.
    ///
    /// A fresh send resets the pipeline; a retry resumes its budget where
    /// [`check_response`](Self::check_response) left it. Secondary-ok
    /// queries try secondaries first and settle on the primary once the
    /// budget is spent.
    pub async fn say(&mut self, msg: &Message, is_retry: bool) -> RsResult<()> {
        if !is_retry {
            self.pipeline = PipelineState::default();
        }

        let secondary_ok = msg.is_secondary_ok_query();
        if secondary_ok {
            for attempt in self.pipeline.retries..PIPELINE_MAX_RETRIES {
                let result = async {
                    let conn = self.check_secondary().await?;
                    conn.say(msg).await
                }
                .await;
                match result {
                    Ok(()) => {
                        self.pipeline.last_op = Some(msg.op);
                        self.pipeline.secondary_ok = true;
                        self.pipeline.retries = attempt;
                        self.pipeline.last_client = LastClient::Secondary;
                        return Ok(());
                    }
                    Err(e) => {
                        debug!("can't send to replica set secondary attempt {}: {}", attempt, e);
                    }
                }
            }
        }

        let conn = self.check_primary().await?;
        conn.say(msg).await?;
        self.pipeline.last_op = Some(msg.op);
        self.pipeline.secondary_ok = secondary_ok;
        self.pipeline.retries = PIPELINE_MAX_RETRIES;
        self.pipeline.last_client = LastClient::Primary;
        Ok(())
    }

    /// Receive the reply to the last [`say`](Self::say).
    pub async fn recv(&mut self) -> RsResult<Reply> {
        let Some(conn) = self.last_client_conn() else {
            return Err(RsError::NoRequestInFlight);
        };
        match conn.recv().await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                warn!("could not receive data from {}: {}", conn.server_address(), e);
                Err(RsError::Network)
            }
        }
    }

    /// Decide whether a pipelined exchange should be re-sent.
    ///
    /// `data` is the first returned document, if any; `n_returned == -1`
    /// marks a network-level failure. A stepdown answer invalidates the
    /// member that produced it, and `retry` is set while budget remains.
    /// Only secondary-ok queries are ever retried.
    pub fn check_response(&mut self, data: Option<&Document>, n_returned: i64) -> ResponseCheck {
        let mut out = ResponseCheck {
            retry: false,
            target_host: self.last_client_conn().map(|c| c.server_address()),
        };

        if self.pipeline.last_client == LastClient::None {
            return out;
        }
        if n_returned != 1 && n_returned != -1 {
            return out;
        }
        if self.pipeline.last_op != Some(OpCode::Query) || !self.pipeline.secondary_ok {
            return out;
        }

        let stepped_down = n_returned == -1
            || data.map_or(false, |doc| {
                has_err_field(doc) && error_code(doc) == Some(NOT_PRIMARY_OR_SECONDARY)
            });
        if !stepped_down {
            return out;
        }

        match self.pipeline.last_client {
            LastClient::Secondary => self.mark_not_secondary(),
            LastClient::Primary => self.mark_not_primary(),
            LastClient::None => {}
        }

        if self.pipeline.retries < PIPELINE_MAX_RETRIES {
            self.pipeline.retries += 1;
            out.retry = true;
        } else {
            warn!(
                "too many retries ({}), could not get data from replica set",
                self.pipeline.retries
            );
        }
        out
    }

    fn last_client_conn(&self) -> Option<Arc<dyn DocClient>> {
        match self.pipeline.last_client {
            LastClient::Primary => self.primary.clone(),
            LastClient::Secondary => self.secondary.clone(),
            LastClient::None => None,
        }
    }

    // ─── Invalidation ───────────────────────────────────────────────────────

    /// The bound primary answered as a non-primary: tell the monitor and
    /// drop the connection.
    pub fn mark_not_primary(&mut self) {
        if let Some(host) = &self.primary_host {
            info!("got not primary for: {}", host);
            self.monitor.notify_primary_failure(host);
        }
        self.primary = None;
    }

    /// The bound secondary stopped serving reads: tell the monitor and
    /// drop the connection.
    pub fn mark_not_secondary(&mut self) {
        if let Some(host) = &self.secondary_host {
            info!("secondary no longer has secondary status: {}", host);
            self.monitor.notify_secondary_failure(host);
        }
        self.secondary = None;
    }

    /// Not routable here: a replica-set handle cannot know which member
    /// owns a cursor id, since reads may have gone to any secondary and
    /// a cursor can outlive a primary change.
    pub fn kill_cursor(&self, _cursor_id: i64) -> RsResult<()> {
        Err(RsError::CursorUnsupported)
    }
}
