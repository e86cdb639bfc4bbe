//! Context acquisition, version negotiation, and teardown.
//!
//! One adapter context binds to exactly one token session for its entire
//! life. Acquisition validates the host descriptor field by field,
//! negotiates the interface version, builds the immutable operation table
//! for that version, and only then opens the token session, so a session
//! failure leaves nothing behind. Deletion consumes the context, so a
//! second deletion is unrepresentable.
//!
//! The context is not thread-safe. The host must serialize calls against
//! one context, or install lock/unlock hooks in the descriptor and make
//! them block; the built-in default does nothing.

use tracing::{debug, instrument, warn};

use crate::dispatch::OperationTable;
use crate::error::Status;
use crate::host::{
    HostAlloc, HostDescriptor, MAXIMUM_SUPPORTED_VERSION, MINIMUM_SUPPORTED_VERSION,
};
use crate::token::{CardBinding, TokenConnector, TokenSession};

/// Per-token adapter state. Owned by the host from acquisition to
/// deletion.
pub struct AdapterContext<S: TokenSession> {
    pub(crate) session: S,
    pub(crate) host: HostAlloc,
    pub(crate) table: OperationTable<S>,
    version: u32,
}

impl<S: TokenSession> AdapterContext<S> {
    /// Negotiated interface version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// The operation table installed for the negotiated version.
    pub fn operations(&self) -> &OperationTable<S> {
        &self.table
    }

    /// The bound token session.
    pub fn session(&self) -> &S {
        &self.session
    }

    /// The validated host allocator capability.
    pub fn allocator(&self) -> &HostAlloc {
        &self.host
    }
}

impl<S: TokenSession> core::fmt::Debug for AdapterContext<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AdapterContext")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Validate the host descriptor, negotiate a version, and bind a token
/// session.
///
/// Validation order and statuses:
/// 1. `flags` must be exactly zero: `InvalidParameter`.
/// 2. `requested_version` below the minimum: `RevisionMismatch`, with the
///    version field left untouched.
/// 3. Card identity (ATR) present with at least 4 bytes:
///    `InvalidParameter`.
/// 4. Card name present: `InvalidParameter`.
/// 5. All three memory callbacks present: `InvalidParameter`.
/// 6. Card handle non-zero: `InvalidHandle`.
///
/// A `requested_version` above the maximum is clamped down in the
/// descriptor; this is the only field the adapter rewrites. A token
/// session failure surfaces as `Unexpected` and no context survives.
#[instrument(skip_all, fields(version = descriptor.requested_version, flags))]
pub fn acquire_context<C: TokenConnector>(
    connector: &C,
    descriptor: &mut HostDescriptor,
    flags: u32,
) -> Result<AdapterContext<C::Session>, Status> {
    if flags != 0 {
        warn!(flags, "nonzero acquisition flags");
        return Err(Status::InvalidParameter);
    }

    if descriptor.requested_version < MINIMUM_SUPPORTED_VERSION {
        warn!(
            requested = descriptor.requested_version,
            minimum = MINIMUM_SUPPORTED_VERSION,
            "requested version below minimum"
        );
        return Err(Status::RevisionMismatch);
    }

    let atr = descriptor.atr.as_deref().ok_or(Status::InvalidParameter)?;
    if atr.len() < 4 {
        return Err(Status::InvalidParameter);
    }

    if descriptor.card_name.is_none() {
        return Err(Status::InvalidParameter);
    }

    let host = HostAlloc::from_callbacks(&descriptor.callbacks).ok_or(Status::InvalidParameter)?;

    if descriptor.card_handle == 0 {
        return Err(Status::InvalidHandle);
    }

    if descriptor.requested_version > MAXIMUM_SUPPORTED_VERSION {
        descriptor.requested_version = MAXIMUM_SUPPORTED_VERSION;
    }
    let version = descriptor.requested_version;

    let table = OperationTable::for_version(version);

    let binding = CardBinding {
        card_handle: descriptor.card_handle,
        transport_handle: descriptor.transport_handle,
        atr: atr.to_vec(),
    };
    let session = match connector.open(binding) {
        Ok(session) => session,
        Err(err) => {
            warn!(error = %err, "token session open failed");
            return Err(Status::Unexpected);
        }
    };

    debug!(version, "context acquired");
    Ok(AdapterContext {
        session,
        host,
        table,
        version,
    })
}

/// Release the token session and destroy the context.
#[instrument(skip_all)]
pub fn delete_context<S: TokenSession>(ctx: AdapterContext<S>) {
    debug!("context deleted");
    ctx.session.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{SoftConnector, SoftToken};

    const SERIAL: [u8; 16] = *b"DECC0100123456  ";
    const ATR: [u8; 5] = [0x3b, 0x8e, 0x80, 0x01, 0x83];

    fn connector() -> SoftConnector {
        SoftConnector::new(SoftToken::new(SERIAL))
    }

    fn descriptor() -> HostDescriptor {
        HostDescriptor::new("cardbridge test card", &ATR, 0x5ca7d)
    }

    #[test]
    fn acquisition_negotiates_and_clamps_the_version() {
        let mut desc = descriptor();
        desc.requested_version = 9;
        let ctx = acquire_context(&connector(), &mut desc, 0).unwrap();
        assert_eq!(desc.requested_version, MAXIMUM_SUPPORTED_VERSION);
        assert_eq!(ctx.version(), MAXIMUM_SUPPORTED_VERSION);
        delete_context(ctx);
    }

    #[test]
    fn versions_in_range_pass_through() {
        let mut desc = descriptor();
        desc.requested_version = 5;
        let ctx = acquire_context(&connector(), &mut desc, 0).unwrap();
        assert_eq!(desc.requested_version, 5);
        assert_eq!(ctx.version(), 5);
    }

    #[test]
    fn nonzero_flags_are_rejected() {
        let mut desc = descriptor();
        assert_eq!(
            acquire_context(&connector(), &mut desc, 1).unwrap_err(),
            Status::InvalidParameter
        );
    }

    #[test]
    fn low_versions_mismatch_without_touching_the_field() {
        let mut desc = descriptor();
        desc.requested_version = 3;
        assert_eq!(
            acquire_context(&connector(), &mut desc, 0).unwrap_err(),
            Status::RevisionMismatch
        );
        assert_eq!(desc.requested_version, 3);
    }

    #[test]
    fn short_or_missing_atr_is_rejected() {
        let mut desc = descriptor();
        desc.atr = Some(vec![0x3b, 0x8e, 0x80]);
        assert_eq!(
            acquire_context(&connector(), &mut desc, 0).unwrap_err(),
            Status::InvalidParameter
        );
        desc.atr = None;
        assert_eq!(
            acquire_context(&connector(), &mut desc, 0).unwrap_err(),
            Status::InvalidParameter
        );
    }

    #[test]
    fn missing_card_name_is_rejected() {
        let mut desc = descriptor();
        desc.card_name = None;
        assert_eq!(
            acquire_context(&connector(), &mut desc, 0).unwrap_err(),
            Status::InvalidParameter
        );
    }

    #[test]
    fn missing_allocator_callback_is_rejected() {
        let mut desc = descriptor();
        desc.callbacks.realloc = None;
        assert_eq!(
            acquire_context(&connector(), &mut desc, 0).unwrap_err(),
            Status::InvalidParameter
        );
    }

    #[test]
    fn zero_card_handle_is_an_invalid_handle() {
        let mut desc = descriptor();
        desc.card_handle = 0;
        assert_eq!(
            acquire_context(&connector(), &mut desc, 0).unwrap_err(),
            Status::InvalidHandle
        );
    }

    #[test]
    fn session_open_failure_is_unexpected() {
        let connector = SoftConnector::failing(SoftToken::new(SERIAL));
        let mut desc = descriptor();
        assert_eq!(
            acquire_context(&connector, &mut desc, 0).unwrap_err(),
            Status::Unexpected
        );
        // The version was still clamped before the open was attempted; the
        // field is only guaranteed untouched on validation failures.
    }
}
