//! Session orchestrator.
//!
//! Owns the single live relay connection. Each connection gets a drain task
//! that feeds inbound events through the step handlers in emission order,
//! plus a supervisor that waits for the disconnect (or an explicit cancel),
//! cancels the drain task and clears the connection. Cleanup closes the
//! event channel, then kills the relay session; both are idempotent, so a
//! cancel racing a disconnect still produces one of each.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use wc_core::relay::{
    CallRequest, RelayConnector, RelayEvent, RelayEventKind, RequestMethod,
};
use wc_core::{
    ConnectionId, ConnectionStep, DappSession, PeerMeta, RelayError, SessionDetails, StepChange,
    WalletConnectUri,
};
use wc_relay::{EventChannel, RelayAdapter};
use wc_settings::BridgeSettings;
use wc_store::SessionStore;

use crate::actions::{UserResponse, WalletConnectAction};
use crate::bridge::{StepToken, UiBridge, MODAL_ORIGIN, WALLET_CONNECT_MODAL};
use crate::collaborators::{AccountProvider, TransactionApprover};
use crate::error::SessionError;

const ACCOUNT_MISSING: &str = "Failed to extract ETH account.";

struct ActiveConnection {
    adapter: Arc<RelayAdapter>,
    cancel: CancellationToken,
}

impl ActiveConnection {
    fn close(&self) {
        self.adapter.unsubscribe();
        self.adapter.kill_session();
        self.cancel.cancel();
    }
}

struct Inner {
    connector: Arc<dyn RelayConnector>,
    store: Arc<SessionStore>,
    accounts: Arc<dyn AccountProvider>,
    approver: Option<Arc<dyn TransactionApprover>>,
    settings: BridgeSettings,
    ui: UiBridge,
    active: Mutex<Option<ActiveConnection>>,
    live: watch::Sender<Option<ConnectionId>>,
    session_details: Mutex<Option<SessionDetails>>,
}

pub struct OrchestratorBuilder {
    connector: Arc<dyn RelayConnector>,
    store: Arc<SessionStore>,
    accounts: Arc<dyn AccountProvider>,
    approver: Option<Arc<dyn TransactionApprover>>,
    settings: BridgeSettings,
}

impl OrchestratorBuilder {
    pub fn settings(mut self, settings: BridgeSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn transaction_approver(mut self, approver: Arc<dyn TransactionApprover>) -> Self {
        self.approver = Some(approver);
        self
    }

    pub fn build(self) -> SessionOrchestrator {
        let (live, _) = watch::channel(None);
        SessionOrchestrator {
            inner: Arc::new(Inner {
                connector: self.connector,
                store: self.store,
                accounts: self.accounts,
                approver: self.approver,
                settings: self.settings,
                ui: UiBridge::new(),
                active: Mutex::new(None),
                live,
                session_details: Mutex::new(None),
            }),
        }
    }
}

/// Restores the step shown before an operation switched to `LOADING`,
/// unless the operation commits or a newer step was shown meanwhile.
struct StepGuard<'a> {
    ui: &'a UiBridge,
    restore: Option<(StepToken, StepChange)>,
}

impl<'a> StepGuard<'a> {
    fn loading(ui: &'a UiBridge) -> Self {
        let (previous, token) = ui.replace_step(StepChange::new(ConnectionStep::Loading));
        Self {
            ui,
            restore: Some((token, previous)),
        }
    }

    fn commit(mut self) {
        self.restore = None;
    }
}

impl Drop for StepGuard<'_> {
    fn drop(&mut self) {
        if let Some((token, previous)) = self.restore.take() {
            let name = previous.name;
            if self.ui.restore_step(token, previous) {
                debug!(step = %name, "restored step");
            }
        }
    }
}

#[derive(Clone)]
pub struct SessionOrchestrator {
    inner: Arc<Inner>,
}

impl SessionOrchestrator {
    pub fn builder(
        connector: Arc<dyn RelayConnector>,
        store: Arc<SessionStore>,
        accounts: Arc<dyn AccountProvider>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            connector,
            store,
            accounts,
            approver: None,
            settings: BridgeSettings::default(),
        }
    }

    pub fn ui(&self) -> &UiBridge {
        &self.inner.ui
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.inner.store
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.inner.settings
    }

    /// Session details of the dapp most recently launched or approved.
    pub fn current_session_details(&self) -> Option<SessionDetails> {
        self.inner.session_details.lock().clone()
    }

    pub fn active_connection_id(&self) -> Option<ConnectionId> {
        self.inner.active.lock().as_ref().map(|a| a.adapter.id().clone())
    }

    pub fn active_peer_meta(&self) -> Option<PeerMeta> {
        self.inner
            .active
            .lock()
            .as_ref()
            .and_then(|a| a.adapter.peer_meta())
    }

    /// Id of the live connection, `None` while idle.
    pub fn watch_connection(&self) -> watch::Receiver<Option<ConnectionId>> {
        self.inner.live.subscribe()
    }

    /// Run `action`, logging any failure instead of returning it.
    pub async fn dispatch(&self, action: WalletConnectAction) {
        let name = action.name();
        let result = match action {
            WalletConnectAction::LaunchDappConnection {
                session_details,
                uri,
            } => self
                .launch_dapp_connection(session_details, &uri)
                .await
                .map(|_| ()),
            WalletConnectAction::RemoveDappConnection { session_details } => {
                self.remove_dapp_connection(&session_details).map(|_| ())
            }
            WalletConnectAction::InitWalletConnect {
                session_details,
                uri,
            } => self
                .init_wallet_connect(session_details, &uri)
                .await
                .map(|_| ()),
            WalletConnectAction::AddNewDappConnection { uri } => {
                self.add_new_dapp_connection(&uri).await.map(|_| ())
            }
            WalletConnectAction::RespondToSessionRequest {
                action,
                session_details,
                uri,
            } => self.respond_to_session_request(action, session_details, &uri),
            WalletConnectAction::RespondToTxSendRequest {
                action,
                request_details,
            } => {
                self.respond_to_tx_send_request(action, request_details)
                    .await
            }
        };

        if let Err(e) = result {
            if e.is_precondition() || matches!(e, SessionError::ApprovalUnsupported) {
                warn!(action = name, kind = e.error_kind(), error = %e, "action ignored");
            } else {
                error!(action = name, kind = e.error_kind(), error = %e, "action failed");
            }
        }
    }

    /// Show the dashboard for a stored dapp, connecting unless the live
    /// connection already serves it.
    #[instrument(skip_all, fields(dapp = %session_details.peer_meta.label()))]
    pub async fn launch_dapp_connection(
        &self,
        session_details: SessionDetails,
        uri: &str,
    ) -> Result<Option<ConnectionId>, SessionError> {
        *self.inner.session_details.lock() = Some(session_details.clone());
        self.inner
            .ui
            .set_step(StepChange::new(ConnectionStep::SessionDashboard));
        self.inner.ui.request_modal(WALLET_CONNECT_MODAL, MODAL_ORIGIN);

        if self.serves(&session_details.peer_meta) {
            debug!("live connection already serves this dapp");
            return Ok(None);
        }
        self.init_wallet_connect(Some(session_details), uri)
            .await
            .map(Some)
    }

    /// Open a relay connection and start draining its events.
    ///
    /// With `session_details` for a stored dapp, its client id is passed as
    /// the resume hint. Any other live connection is torn down first.
    #[instrument(skip_all, fields(topic = tracing::field::Empty, resume = tracing::field::Empty))]
    pub async fn init_wallet_connect(
        &self,
        session_details: Option<SessionDetails>,
        uri: &str,
    ) -> Result<ConnectionId, SessionError> {
        let uri = WalletConnectUri::parse(uri)?;
        let span = tracing::Span::current();
        span.record("topic", uri.topic.as_str());

        let peer_meta = session_details.map(|d| d.peer_meta);
        let resume = match &peer_meta {
            Some(peer) => self.inner.store.find(peer)?.map(|s| s.client_id),
            None => None,
        };
        span.record("resume", resume.is_some());

        self.teardown("superseded");

        let adapter = RelayAdapter::open(
            self.inner.connector.as_ref(),
            self.inner.settings.client_meta.clone(),
            uri.as_str(),
            resume,
            peer_meta,
        )
        .await?;
        let channel = EventChannel::open(Arc::clone(&adapter))?;
        let id = adapter.id().clone();
        let cancel = CancellationToken::new();

        if let Some(previous) = self.install(ActiveConnection {
            adapter,
            cancel: cancel.clone(),
        }) {
            // Another init won the race while this one was connecting
            previous.close();
        }
        self.spawn_connection(id.clone(), channel, cancel);
        info!(connection_id = %id, "wallet connect started");
        Ok(id)
    }

    #[instrument(skip_all, fields(action = ?action, dapp = %session_details.peer_meta.label()))]
    pub fn respond_to_session_request(
        &self,
        action: UserResponse,
        session_details: SessionDetails,
        uri: &str,
    ) -> Result<(), SessionError> {
        let guard = StepGuard::loading(&self.inner.ui);
        let adapter = self.active_adapter()?;

        match action {
            UserResponse::Approve => {
                if !adapter.has_pending_session() {
                    return Err(RelayError::NoPendingSession.into());
                }
                let chain_id = self.inner.settings.chain_id;
                let account = self
                    .inner
                    .accounts
                    .primary_account(chain_id)
                    .ok_or_else(|| SessionError::AccountUnavailable(ACCOUNT_MISSING.into()))?;

                *self.inner.session_details.lock() = Some(session_details.clone());
                let fingerprint = session_details.peer_meta.fingerprint();
                self.inner.store.upsert(DappSession::new(
                    adapter.client_id(),
                    session_details,
                    uri,
                ))?;
                adapter.approve_session(vec![account], chain_id)?;

                guard.commit();
                self.inner
                    .ui
                    .set_step(StepChange::new(ConnectionStep::SessionDashboard));
                info!(connection_id = %adapter.id(), %fingerprint, chain_id, "session approved");
            }
            UserResponse::Reject => {
                adapter.reject_session(&self.inner.settings.messages.session_rejected)?;
                // The disconnect that follows moves the step on
                guard.commit();
                info!(connection_id = %adapter.id(), "session rejected");
            }
        }
        Ok(())
    }

    #[instrument(skip_all, fields(action = ?action, request_id = request.id, method = %request.method))]
    pub async fn respond_to_tx_send_request(
        &self,
        action: UserResponse,
        request: CallRequest,
    ) -> Result<(), SessionError> {
        let guard = StepGuard::loading(&self.inner.ui);
        let adapter = self.active_adapter()?;
        if !adapter.has_pending_request(request.id) {
            return Err(RelayError::UnknownRequest(request.id).into());
        }

        match action {
            UserResponse::Approve => {
                let approver = self
                    .inner
                    .approver
                    .clone()
                    .ok_or(SessionError::ApprovalUnsupported)?;
                let result = approver.approve(&request).await?;
                adapter.approve_request(request.id, result)?;
                info!(connection_id = %adapter.id(), "transaction approved");
            }
            UserResponse::Reject => {
                adapter.reject_request(
                    request.id,
                    &self.inner.settings.messages.transaction_rejected,
                )?;
                info!(connection_id = %adapter.id(), "transaction rejected");
            }
        }

        guard.commit();
        self.inner
            .ui
            .set_step(StepChange::new(ConnectionStep::SessionDashboard));
        Ok(())
    }

    /// Forget a dapp. Kills the live connection if it serves that dapp.
    ///
    /// Returns whether a live connection was killed.
    #[instrument(skip_all, fields(dapp = %session_details.peer_meta.label()))]
    pub fn remove_dapp_connection(
        &self,
        session_details: &SessionDetails,
    ) -> Result<bool, SessionError> {
        let removed = {
            let mut active = self.inner.active.lock();
            let matches = active
                .as_ref()
                .is_some_and(|a| a.adapter.matches(&session_details.peer_meta));
            if matches {
                self.inner.live.send_replace(None);
                active.take()
            } else {
                None
            }
        };

        let killed = match removed {
            Some(connection) => {
                connection.close();
                info!(connection_id = %connection.adapter.id(), "live connection killed");
                true
            }
            None => false,
        };
        self.inner.store.remove(&session_details.peer_meta)?;
        Ok(killed)
    }

    /// Connect to a dapp from a freshly entered URI.
    #[instrument(skip_all)]
    pub async fn add_new_dapp_connection(&self, uri: &str) -> Result<ConnectionId, SessionError> {
        let guard = StepGuard::loading(&self.inner.ui);
        let id = self.init_wallet_connect(None, uri).await?;
        guard.commit();
        Ok(id)
    }

    /// Tear down the live connection, if any.
    pub fn shutdown(&self) {
        self.teardown("shutdown");
    }

    fn serves(&self, peer_meta: &PeerMeta) -> bool {
        self.inner
            .active
            .lock()
            .as_ref()
            .is_some_and(|a| !a.adapter.is_killed() && a.adapter.matches(peer_meta))
    }

    fn active_adapter(&self) -> Result<Arc<RelayAdapter>, SessionError> {
        self.inner
            .active
            .lock()
            .as_ref()
            .map(|a| Arc::clone(&a.adapter))
            .ok_or(SessionError::NoActiveConnection)
    }

    fn install(&self, connection: ActiveConnection) -> Option<ActiveConnection> {
        let mut active = self.inner.active.lock();
        self.inner
            .live
            .send_replace(Some(connection.adapter.id().clone()));
        active.replace(connection)
    }

    fn teardown(&self, reason: &str) {
        let previous = {
            let mut active = self.inner.active.lock();
            self.inner.live.send_replace(None);
            active.take()
        };
        if let Some(connection) = previous {
            info!(connection_id = %connection.adapter.id(), reason, "tearing down connection");
            connection.close();
        }
    }

    fn clear_active(&self, id: &ConnectionId) {
        let mut active = self.inner.active.lock();
        if active.as_ref().is_some_and(|a| a.adapter.id() == id) {
            active.take();
            self.inner.live.send_replace(None);
        }
    }

    fn spawn_connection(&self, id: ConnectionId, mut channel: EventChannel, cancel: CancellationToken) {
        let (disconnected_tx, disconnected_rx) = oneshot::channel::<()>();

        let drain = {
            let orchestrator = self.clone();
            let cancel = cancel.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let mut disconnected = Some(disconnected_tx);
                loop {
                    let event = tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        event = channel.recv() => event,
                    };
                    let Some(event) = event else { break };
                    let kind = event.kind;
                    orchestrator.handle_event(&id, event);
                    if kind == RelayEventKind::Disconnect {
                        if let Some(tx) = disconnected.take() {
                            let _ = tx.send(());
                        }
                        break;
                    }
                }
                channel.close();
            })
        };

        let orchestrator = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = disconnected_rx => {}
                () = cancel.cancelled() => {}
            }
            cancel.cancel();
            if let Err(e) = drain.await {
                error!(connection_id = %id, error = %e, "event drain task failed");
            }
            orchestrator.clear_active(&id);
            debug!(connection_id = %id, "connection closed");
        });
    }

    fn handle_event(&self, connection_id: &ConnectionId, event: RelayEvent) {
        let ui = &self.inner.ui;
        match event.kind {
            RelayEventKind::SessionRequest => match event.session_proposal() {
                Ok(proposal) => {
                    info!(%connection_id, "session request received");
                    ui.set_step(
                        StepChange::new(ConnectionStep::AuthorizeConnection)
                            .with_data(proposal)
                            .with_error(event.error),
                    );
                }
                Err(e) => warn!(%connection_id, error = %e, "dropping session request"),
            },
            RelayEventKind::CallRequest => match event.call_request() {
                Ok(call) => match call.request_method() {
                    RequestMethod::EthSendTransaction => {
                        info!(%connection_id, request_id = call.id, "transaction request received");
                        ui.set_step(
                            StepChange::new(ConnectionStep::ApproveTransaction)
                                .with_data(event.payload)
                                .with_error(event.error),
                        );
                    }
                    method => {
                        debug!(%connection_id, request_id = call.id, method = method.as_str(), "call request not handled");
                    }
                },
                Err(e) => warn!(%connection_id, error = %e, "dropping call request"),
            },
            RelayEventKind::Disconnect => {
                info!(%connection_id, error = ?event.error, "dapp disconnected");
                ui.set_step(
                    StepChange::new(ConnectionStep::DisconnectionNotice)
                        .with_data(event.payload)
                        .with_error(event.error),
                );
            }
        }
    }
}

impl std::fmt::Debug for SessionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOrchestrator")
            .field("active", &self.active_connection_id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_guard_restores_unless_committed() {
        let ui = UiBridge::new();
        ui.set_step(StepChange::new(ConnectionStep::SessionDashboard));
        {
            let _guard = StepGuard::loading(&ui);
            assert_eq!(ui.current_step().name, ConnectionStep::Loading);
        }
        assert_eq!(ui.current_step().name, ConnectionStep::SessionDashboard);

        let guard = StepGuard::loading(&ui);
        guard.commit();
        assert_eq!(ui.current_step().name, ConnectionStep::Loading);
    }

    #[test]
    fn step_guard_restores_data() {
        let ui = UiBridge::new();
        let shown = StepChange::new(ConnectionStep::ApproveTransaction)
            .with_data(serde_json::json!({"id": 3}));
        ui.set_step(shown.clone());
        drop(StepGuard::loading(&ui));
        assert_eq!(ui.current_step(), shown);
    }

    #[test]
    fn step_guard_keeps_a_step_shown_after_loading() {
        let ui = UiBridge::new();
        ui.set_step(StepChange::new(ConnectionStep::ApproveTransaction));
        let guard = StepGuard::loading(&ui);

        ui.set_step(StepChange::new(ConnectionStep::DisconnectionNotice));
        drop(guard);
        assert_eq!(ui.current_step().name, ConnectionStep::DisconnectionNotice);
    }
}
