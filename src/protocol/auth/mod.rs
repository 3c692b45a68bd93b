//! Server-side RPC authentication as specified in RFC 5531 section 9.
//!
//! Every inbound call passes through [`SvcAuthenticator::authenticate`]
//! exactly once before the service procedure is dispatched. The
//! authenticator maps the call's credential flavor to a handler through a
//! fixed table, the handler inspects the untrusted credential and verifier
//! bytes, and the outcome is always a value: an [`AuthContext`] on success
//! or an [`auth_stat`] rejection code to be sent back in a denied reply.
//! Malformed input can never panic this path.
//!
//! Flavors handled in the fixed table:
//!
//! - AUTH_NONE: always accepted, anonymous principal
//! - AUTH_UNIX: credential body decoded by [`unix::decode_unix_credential`]
//! - AUTH_SHORT: always rejected — the shorthand credential cache is
//!   deliberately not implemented, clients fall back to full credentials
//!
//! Any other flavor (DES, Kerberos, RPCSEC_GSS, unknown values) is rejected
//! with `AUTH_REJECTEDCRED` without invoking a handler.

pub mod unix;

use tracing::{debug, trace};

use crate::protocol::xdr::rpc::{auth_flavor, auth_stat, call_body, opaque_auth};

pub use unix::{decode_unix_credential, CredentialError, UnixCredential};

/// The authenticated identity of a caller, valid for one call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Principal {
    /// No identity claimed (AUTH_NONE)
    #[default]
    Anonymous,
    /// Identity decoded from an AUTH_UNIX credential
    Unix(UnixCredential),
}

/// Successful authentication outcome for a single call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthContext {
    /// Who the caller is, as far as the flavor can tell
    pub principal: Principal,
    /// Verifier to send back in the reply header. The connection's previous
    /// verifier slot is overwritten on every successful call.
    pub response_verifier: opaque_auth,
}

/// A single authentication flavor implementation.
///
/// Given a call's credential and verifier, produce either an accept verdict
/// with a principal and an outbound verifier, or a rejection status.
pub trait FlavorHandler: Send + Sync {
    fn authenticate(
        &self,
        cred: &opaque_auth,
        verf: &opaque_auth,
    ) -> Result<AuthContext, auth_stat>;
}

/// AUTH_NONE: no identity claimed, always accepted.
struct NoneFlavor;

impl FlavorHandler for NoneFlavor {
    fn authenticate(
        &self,
        _cred: &opaque_auth,
        _verf: &opaque_auth,
    ) -> Result<AuthContext, auth_stat> {
        Ok(AuthContext { principal: Principal::Anonymous, response_verifier: opaque_auth::default() })
    }
}

/// AUTH_UNIX: decode the credential body with full bounds validation.
///
/// The response verifier is the NONE flavor with an empty body; AUTH_UNIX
/// carries no proof material for the server to echo.
struct UnixFlavor;

impl FlavorHandler for UnixFlavor {
    fn authenticate(
        &self,
        cred: &opaque_auth,
        _verf: &opaque_auth,
    ) -> Result<AuthContext, auth_stat> {
        match decode_unix_credential(&cred.body) {
            Ok(credential) => Ok(AuthContext {
                principal: Principal::Unix(credential),
                response_verifier: opaque_auth::default(),
            }),
            Err(e) => {
                debug!("rejecting AUTH_UNIX credential: {e}");
                Err(auth_stat::AUTH_BADCRED)
            }
        }
    }
}

/// AUTH_SHORT: the server-issued shorthand credential cache is not
/// implemented, so every shorthand credential is rejected and the client is
/// expected to retry with its full AUTH_UNIX credential.
struct ShortFlavor;

impl FlavorHandler for ShortFlavor {
    fn authenticate(
        &self,
        _cred: &opaque_auth,
        _verf: &opaque_auth,
    ) -> Result<AuthContext, auth_stat> {
        Err(auth_stat::AUTH_REJECTEDCRED)
    }
}

/// The per-server authentication entry point with its flavor dispatch table.
///
/// The table is fixed at construction; there is no runtime flavor
/// registration. Lookup is an exact match on the credential flavor, and a
/// miss rejects the call before any handler runs.
pub struct SvcAuthenticator {
    table: Vec<(auth_flavor, Box<dyn FlavorHandler>)>,
}

impl SvcAuthenticator {
    /// Builds the standard table: NONE, UNIX and SHORT.
    pub fn new() -> Self {
        Self::with_handlers(vec![
            (auth_flavor::AUTH_NONE, Box::new(NoneFlavor) as Box<dyn FlavorHandler>),
            (auth_flavor::AUTH_UNIX, Box::new(UnixFlavor)),
            (auth_flavor::AUTH_SHORT, Box::new(ShortFlavor)),
        ])
    }

    /// Builds an authenticator over an explicit handler table.
    ///
    /// Exists for embedders that compile in additional flavors and for tests
    /// that need to observe handler invocation; the table is still fixed for
    /// the lifetime of the authenticator.
    pub fn with_handlers(table: Vec<(auth_flavor, Box<dyn FlavorHandler>)>) -> Self {
        Self { table }
    }

    /// Authenticates one inbound call.
    ///
    /// Invoked by the dispatch loop once per CALL message before the service
    /// procedure runs. On `Err`, the dispatcher sends a denied reply carrying
    /// the status and never invokes the procedure. Failures are terminal for
    /// the call; nothing is retried.
    pub fn authenticate(&self, call: &call_body) -> Result<AuthContext, auth_stat> {
        let Some((_, handler)) = self.table.iter().find(|(f, _)| *f == call.cred.flavor) else {
            trace!("no handler for auth flavor {:?}", call.cred.flavor);
            return Err(auth_stat::AUTH_REJECTEDCRED);
        };
        handler.authenticate(&call.cred, &call.verf)
    }
}

impl Default for SvcAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}
