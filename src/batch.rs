//! Batch confirmation of sign requests.
//!
//! A batch holds requests from one or more client applications, each
//! addressed to one local account. Confirming the batch signs (or
//! encrypts/decrypts) every request it can and routes each answer either
//! back to the caller as a [`SignResult`] or, for remote-signer (bunker)
//! requests, to the requesting app's relays through the pool.
//!
//! Requests that cannot be served (unknown account, no key to identify the
//! app, signer refusal) are skipped; the rest of the batch continues.
//!
//! # Routing
//!
//! | Request | Answer |
//! |---------|--------|
//! | `SIGN_EVENT` | Signature, or full signed JSON for an anonymous zap request |
//! | Encrypt/decrypt kinds | Output of [`Signer::transform`] |
//! | Any kind with a bunker request | Published as a response event instead |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::pool::RelayPool;
use crate::protocol::{Event, UnsignedEvent};
use crate::relay::LoadingCallback;

// ============================================================================
// Constants
// ============================================================================

/// Relay used for bunker responses when the app has none on record.
pub const DEFAULT_BUNKER_RELAY: &str = "wss://relay.nsec.app";

// ============================================================================
// Request Types
// ============================================================================

/// Operation a client application asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignerType {
    /// Sign an event template.
    SignEvent,
    /// NIP-04 encrypt.
    Nip04Encrypt,
    /// NIP-04 decrypt.
    Nip04Decrypt,
    /// NIP-44 encrypt.
    Nip44Encrypt,
    /// NIP-44 decrypt.
    Nip44Decrypt,
    /// Return the account public key.
    GetPublicKey,
    /// Decrypt a private zap.
    DecryptZapEvent,
}

/// Remote-signer context of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BunkerRequest {
    /// Request id to echo in the response.
    pub id: String,
    /// Client public key the response is encrypted to.
    pub local_key: String,
}

/// Response payload sent back to a remote-signer client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BunkerResponse {
    /// Id of the request being answered.
    pub id: String,
    /// Result payload.
    pub result: String,
    /// Error text, if the request failed.
    pub error: Option<String>,
}

/// One pending request in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRequest {
    /// Caller-chosen request id.
    pub id: String,
    /// Requested operation.
    pub kind: SignerType,
    /// Event template JSON or plaintext/ciphertext.
    pub data: String,
    /// Counterparty public key for encrypt/decrypt.
    pub pub_key: String,
    /// Account to use; blank selects the default account.
    pub current_account: String,
    /// Set when the request came over a remote-signer connection.
    pub bunker: Option<BunkerRequest>,
}

// ============================================================================
// Result Types
// ============================================================================

/// Answer returned to the caller for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignResult {
    /// Requesting package, when answering across apps.
    pub package: Option<String>,
    /// Signature, signed JSON or transformed data.
    pub result: String,
    /// Request id.
    pub id: String,
}

/// Outcome of confirming a batch.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Answers for the caller, in request order.
    pub results: Vec<SignResult>,
    /// Bunker responses handed to the pool.
    pub published: usize,
    /// Requests that could not be served.
    pub skipped: usize,
}

impl BatchOutcome {
    /// Serializes `results` as a JSON array, keeping null fields.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if serialization fails.
    pub fn results_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.results)?)
    }
}

// ============================================================================
// Collaborators
// ============================================================================

/// Key holder that signs and transforms on behalf of one account.
pub trait Signer: Send + Sync {
    /// Signs an event template.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Signing`](crate::Error::Signing) if the signer refuses.
    fn sign_event(&self, template: UnsignedEvent) -> Result<Event>;

    /// Encrypts or decrypts `data` for `pub_key`. `None` if not possible.
    fn transform(&self, data: &str, kind: SignerType, pub_key: &str) -> Option<String>;

    /// Builds the signed response event for a remote-signer client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Signing`](crate::Error::Signing) if the signer refuses.
    fn bunker_response(&self, local_key: &str, response: &BunkerResponse) -> Result<Event>;
}

/// A local account.
#[derive(Clone)]
pub struct Account {
    /// Account name (npub or label).
    pub name: String,
    /// The account's signer.
    pub signer: Arc<dyn Signer>,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Source of accounts and per-app settings.
pub trait AccountStore: Send + Sync {
    /// Loads an account by name.
    fn load(&self, account: &str) -> Option<Account>;

    /// Relays recorded for the app identified by `key`.
    fn app_relays(&self, _key: &str) -> Option<Vec<String>> {
        None
    }
}

// ============================================================================
// BatchConfirmer
// ============================================================================

/// Confirms a batch of requests against one pool and account store.
pub struct BatchConfirmer<'a> {
    pool: &'a RelayPool,
    store: &'a dyn AccountStore,
    default_account: &'a Account,
    package_name: Option<&'a str>,
    on_loading: Option<LoadingCallback>,
}

impl<'a> BatchConfirmer<'a> {
    /// Creates a confirmer.
    #[must_use]
    pub fn new(pool: &'a RelayPool, store: &'a dyn AccountStore, default_account: &'a Account) -> Self {
        Self {
            pool,
            store,
            default_account,
            package_name: None,
            on_loading: None,
        }
    }

    /// Sets the calling app's package name, used when a request has no bunker key.
    #[must_use]
    pub fn with_package_name(mut self, package_name: Option<&'a str>) -> Self {
        self.package_name = package_name;
        self
    }

    /// Sets a loading indicator: `true` when confirmation starts, `false` when it ends.
    #[must_use]
    pub fn with_on_loading(mut self, on_loading: LoadingCallback) -> Self {
        self.on_loading = Some(on_loading);
        self
    }

    /// Serves every request in order.
    pub fn confirm_all(&self, requests: &[SignRequest]) -> BatchOutcome {
        if let Some(on_loading) = &self.on_loading {
            on_loading(true);
        }

        let mut outcome = BatchOutcome::default();
        for request in requests {
            match self.confirm(request) {
                Some(Answer::Result(result)) => outcome.results.push(result),
                Some(Answer::Published) => outcome.published += 1,
                None => outcome.skipped += 1,
            }
        }

        info!(
            requests = requests.len(),
            results = outcome.results.len(),
            published = outcome.published,
            skipped = outcome.skipped,
            "Batch confirmed"
        );

        if let Some(on_loading) = &self.on_loading {
            on_loading(false);
        }
        outcome
    }

    /// Serves one request. `None` means skipped.
    fn confirm(&self, request: &SignRequest) -> Option<Answer> {
        let account = self.resolve_account(request)?;

        let Some(key) = request
            .bunker
            .as_ref()
            .map(|b| b.local_key.as_str())
            .or(self.package_name)
        else {
            debug!(request_id = %request.id, "No app key, request skipped");
            return None;
        };

        let payload = if request.kind == SignerType::SignEvent {
            let template = match UnsignedEvent::from_json(&request.data) {
                Ok(template) => template,
                Err(e) => {
                    warn!(request_id = %request.id, error = %e, "Unparseable event template");
                    return None;
                }
            };
            let anonymous_zap = template.is_anonymous_zap();
            let signed = match account.signer.sign_event(template) {
                Ok(signed) => signed,
                Err(e) => {
                    warn!(request_id = %request.id, error = %e, "Signing failed");
                    return None;
                }
            };

            if request.bunker.is_some() || anonymous_zap {
                match signed.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(request_id = %request.id, error = %e, "Signed event not serializable");
                        return None;
                    }
                }
            } else {
                signed.sig
            }
        } else {
            let Some(output) = account
                .signer
                .transform(&request.data, request.kind, &request.pub_key)
            else {
                debug!(request_id = %request.id, kind = ?request.kind, "Transform declined");
                return None;
            };
            output
        };

        match &request.bunker {
            Some(bunker) => self.publish_bunker_response(&account, key, bunker, payload),
            None => Some(Answer::Result(SignResult {
                package: None,
                result: payload,
                id: request.id.clone(),
            })),
        }
    }

    /// Picks the request's account, or the default one for a blank name.
    fn resolve_account(&self, request: &SignRequest) -> Option<Account> {
        if request.current_account.trim().is_empty() {
            return Some(self.default_account.clone());
        }
        let account = self.store.load(&request.current_account);
        if account.is_none() {
            debug!(request_id = %request.id, account = %request.current_account, "Unknown account, request skipped");
        }
        account
    }

    /// Signs a bunker response and publishes it to the app's relays.
    fn publish_bunker_response(
        &self,
        account: &Account,
        key: &str,
        bunker: &BunkerRequest,
        payload: String,
    ) -> Option<Answer> {
        let response = BunkerResponse {
            id: bunker.id.clone(),
            result: payload,
            error: None,
        };
        let event = match account.signer.bunker_response(&bunker.local_key, &response) {
            Ok(event) => event,
            Err(e) => {
                warn!(request_id = %bunker.id, error = %e, "Bunker response signing failed");
                return None;
            }
        };

        let relays = self
            .store
            .app_relays(key)
            .filter(|relays| !relays.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_BUNKER_RELAY.to_string()]);

        for url in &relays {
            if self.pool.get_relays(url).is_empty()
                && let Err(e) = self.pool.add_url(url)
            {
                warn!(url = %url, error = %e, "Cannot add bunker relay");
            }
        }

        let report = self.pool.send_to_selected_relays(&relays, &event, None, None);
        debug!(
            request_id = %bunker.id,
            attempted = report.attempted,
            failures = report.failures.len(),
            "Bunker response dispatched"
        );
        Some(Answer::Published)
    }
}

/// Where one request's answer went.
enum Answer {
    Result(SignResult),
    Published,
}

/// Confirms `requests` with default settings.
///
/// See [`BatchConfirmer`].
pub fn confirm_all(
    pool: &RelayPool,
    requests: &[SignRequest],
    default_account: &Account,
    package_name: Option<&str>,
    store: &dyn AccountStore,
) -> BatchOutcome {
    BatchConfirmer::new(pool, store, default_account)
        .with_package_name(package_name)
        .confirm_all(requests)
}

// ============================================================================
// Tests
// ============================================================================
