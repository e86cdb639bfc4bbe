//! Host-visible entry points: the version-gated operation table and the
//! uniform validation discipline.
//!
//! Every call the host can make is an [`Operation`] routed through the
//! context's [`OperationTable`]. The table is built once, at acquisition,
//! for the negotiated interface version; operations the adapter does not
//! implement share a single stub entry that fails uniformly with
//! `UnsupportedFeature`, and operations a lower negotiated version never
//! installed fail the same way. Validation runs in a fixed order in every
//! implemented entry: structure versions first (`RevisionMismatch`, field
//! untouched), then flag words (exactly zero unless the operation says
//! otherwise), then name and buffer arguments.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::containers;
use crate::context::AdapterContext;
use crate::error::Status;
use crate::host::HostBuf;
use crate::props::{self, CardCapabilities, FreeSpaceInfo, KeySizes};
use crate::token::{AttributeId, ObjectClass, TokenSession};
use crate::vfs::{self, AccessCondition};

/// Structure version of [`FileInfo`].
pub const FILE_INFO_VERSION: u32 = 1;

/// Size and access information for one virtual file. The host initializes
/// `version`; the adapter fills the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub version: u32,
    pub size: u32,
    pub access: AccessCondition,
}

impl Default for FileInfo {
    fn default() -> Self {
        FileInfo {
            version: FILE_INFO_VERSION,
            size: 0,
            access: AccessCondition::Invalid,
        }
    }
}

/// Public keys of one container, rendered into host-owned blobs. The host
/// initializes `version`; the adapter fills the blobs and owns neither
/// afterwards.
#[derive(Debug, Default)]
pub struct ContainerInfo {
    pub version: u32,
    pub sig_public_key: Option<HostBuf>,
    pub key_ex_public_key: Option<HostBuf>,
}

impl ContainerInfo {
    pub fn new() -> Self {
        ContainerInfo {
            version: props::CONTAINER_INFO_VERSION,
            sig_public_key: None,
            key_ex_public_key: None,
        }
    }
}

/// Identity of every operation the interface defines, implemented or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OpCode {
    DeleteContext,
    QueryCapabilities,
    DeleteContainer,
    CreateContainer,
    GetContainerInfo,
    AuthenticatePin,
    GetChallenge,
    AuthenticateChallenge,
    UnblockPin,
    ChangeAuthenticator,
    Deauthenticate,
    CreateDirectory,
    DeleteDirectory,
    CreateFile,
    ReadFile,
    WriteFile,
    DeleteFile,
    EnumFiles,
    GetFileInfo,
    QueryFreeSpace,
    QueryKeySizes,
    SignData,
    RsaDecrypt,
    ConstructDhAgreement,
    DeriveKey,
    DestroyDhAgreement,
    GetChallengeEx,
    AuthenticateEx,
    ChangeAuthenticatorEx,
    DeauthenticateEx,
    GetContainerProperty,
    SetContainerProperty,
    GetProperty,
    SetProperty,
    UnpadData,
    MdImportSessionKey,
    MdEncryptData,
    ImportSessionKey,
    GetSharedKeyHandle,
    GetAlgorithmProperty,
    GetKeyProperty,
    SetKeyProperty,
    DestroyKey,
    ProcessEncryptedData,
    CreateContainerEx,
}

/// One dispatched request.
///
/// Structures passed by mutable reference follow the in/out convention:
/// the host sets their version field, the adapter validates it, normalizes
/// it on success, and fills the remaining fields. Unimplemented operations
/// are unit variants; their arguments would never be read.
#[derive(Debug)]
pub enum Operation<'a> {
    QueryCapabilities {
        capabilities: &'a mut CardCapabilities,
    },
    GetContainerInfo {
        index: u8,
        flags: u32,
        info: &'a mut ContainerInfo,
    },
    AuthenticatePin {
        user: &'a str,
        pin: &'a [u8],
    },
    Deauthenticate {
        user: &'a str,
        flags: u32,
    },
    ReadFile {
        directory: Option<&'a str>,
        file: &'a str,
        flags: u32,
    },
    EnumFiles {
        directory: Option<&'a str>,
        flags: u32,
    },
    GetFileInfo {
        directory: Option<&'a str>,
        file: &'a str,
        info: &'a mut FileInfo,
    },
    QueryFreeSpace {
        flags: u32,
        info: &'a mut FreeSpaceInfo,
    },
    QueryKeySizes {
        key_spec: u32,
        flags: u32,
        sizes: &'a mut KeySizes,
    },
    SignData {
        container: u8,
    },
    RsaDecrypt {
        container: u8,
    },
    GetProperty {
        name: &'a str,
        flags: u32,
        dest: &'a mut [u8],
    },
    GetContainerProperty {
        index: u8,
        name: &'a str,
        flags: u32,
        dest: &'a mut [u8],
    },
    // Interface entries this adapter never implements.
    DeleteContainer,
    CreateContainer,
    GetChallenge,
    AuthenticateChallenge,
    UnblockPin,
    ChangeAuthenticator,
    CreateDirectory,
    DeleteDirectory,
    CreateFile,
    WriteFile,
    DeleteFile,
    ConstructDhAgreement,
    DeriveKey,
    DestroyDhAgreement,
    GetChallengeEx,
    AuthenticateEx,
    ChangeAuthenticatorEx,
    DeauthenticateEx,
    SetContainerProperty,
    SetProperty,
    UnpadData,
    MdImportSessionKey,
    MdEncryptData,
    ImportSessionKey,
    GetSharedKeyHandle,
    GetAlgorithmProperty,
    GetKeyProperty,
    SetKeyProperty,
    DestroyKey,
    ProcessEncryptedData,
    CreateContainerEx,
}

impl Operation<'_> {
    /// Table slot this request routes to.
    pub fn code(&self) -> OpCode {
        match self {
            Operation::QueryCapabilities { .. } => OpCode::QueryCapabilities,
            Operation::GetContainerInfo { .. } => OpCode::GetContainerInfo,
            Operation::AuthenticatePin { .. } => OpCode::AuthenticatePin,
            Operation::Deauthenticate { .. } => OpCode::Deauthenticate,
            Operation::ReadFile { .. } => OpCode::ReadFile,
            Operation::EnumFiles { .. } => OpCode::EnumFiles,
            Operation::GetFileInfo { .. } => OpCode::GetFileInfo,
            Operation::QueryFreeSpace { .. } => OpCode::QueryFreeSpace,
            Operation::QueryKeySizes { .. } => OpCode::QueryKeySizes,
            Operation::SignData { .. } => OpCode::SignData,
            Operation::RsaDecrypt { .. } => OpCode::RsaDecrypt,
            Operation::GetProperty { .. } => OpCode::GetProperty,
            Operation::GetContainerProperty { .. } => OpCode::GetContainerProperty,
            Operation::DeleteContainer => OpCode::DeleteContainer,
            Operation::CreateContainer => OpCode::CreateContainer,
            Operation::GetChallenge => OpCode::GetChallenge,
            Operation::AuthenticateChallenge => OpCode::AuthenticateChallenge,
            Operation::UnblockPin => OpCode::UnblockPin,
            Operation::ChangeAuthenticator => OpCode::ChangeAuthenticator,
            Operation::CreateDirectory => OpCode::CreateDirectory,
            Operation::DeleteDirectory => OpCode::DeleteDirectory,
            Operation::CreateFile => OpCode::CreateFile,
            Operation::WriteFile => OpCode::WriteFile,
            Operation::DeleteFile => OpCode::DeleteFile,
            Operation::ConstructDhAgreement => OpCode::ConstructDhAgreement,
            Operation::DeriveKey => OpCode::DeriveKey,
            Operation::DestroyDhAgreement => OpCode::DestroyDhAgreement,
            Operation::GetChallengeEx => OpCode::GetChallengeEx,
            Operation::AuthenticateEx => OpCode::AuthenticateEx,
            Operation::ChangeAuthenticatorEx => OpCode::ChangeAuthenticatorEx,
            Operation::DeauthenticateEx => OpCode::DeauthenticateEx,
            Operation::SetContainerProperty => OpCode::SetContainerProperty,
            Operation::SetProperty => OpCode::SetProperty,
            Operation::UnpadData => OpCode::UnpadData,
            Operation::MdImportSessionKey => OpCode::MdImportSessionKey,
            Operation::MdEncryptData => OpCode::MdEncryptData,
            Operation::ImportSessionKey => OpCode::ImportSessionKey,
            Operation::GetSharedKeyHandle => OpCode::GetSharedKeyHandle,
            Operation::GetAlgorithmProperty => OpCode::GetAlgorithmProperty,
            Operation::GetKeyProperty => OpCode::GetKeyProperty,
            Operation::SetKeyProperty => OpCode::SetKeyProperty,
            Operation::DestroyKey => OpCode::DestroyKey,
            Operation::ProcessEncryptedData => OpCode::ProcessEncryptedData,
            Operation::CreateContainerEx => OpCode::CreateContainerEx,
        }
    }
}

/// Result of a successful dispatch.
#[derive(Debug)]
pub enum Reply {
    /// Nothing beyond success; in/out structures were filled in place.
    None,
    /// A host-owned buffer (file content, name multistring).
    Data(HostBuf),
    /// Number of bytes written into a caller-supplied destination.
    Written(usize),
}

impl Reply {
    /// The buffer of a [`Reply::Data`], for callers that know the shape.
    pub fn into_data(self) -> Option<HostBuf> {
        match self {
            Reply::Data(buf) => Some(buf),
            _ => None,
        }
    }
}

pub(crate) type Handler<S> =
    for<'a> fn(&mut AdapterContext<S>, Operation<'a>) -> Result<Reply, Status>;

enum Entry<S: TokenSession> {
    Handler(Handler<S>),
    /// Deletion routes through the consuming
    /// [`delete_context`](crate::context::delete_context), not dispatch.
    Lifecycle,
}

impl<S: TokenSession> Clone for Entry<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: TokenSession> Copy for Entry<S> {}

/// Immutable operation table built for one negotiated interface version.
pub struct OperationTable<S: TokenSession> {
    entries: BTreeMap<OpCode, Entry<S>>,
}

impl<S: TokenSession> OperationTable<S> {
    /// Build the table for `version`. Entries introduced by a later
    /// interface version than the negotiated one are not installed; the
    /// key-agreement group is never installed.
    pub fn for_version(version: u32) -> Self {
        let mut entries: BTreeMap<OpCode, Entry<S>> = BTreeMap::new();

        entries.insert(OpCode::DeleteContext, Entry::Lifecycle);
        entries.insert(OpCode::QueryCapabilities, Entry::Handler(handlers::query_capabilities));
        entries.insert(OpCode::DeleteContainer, Entry::Handler(handlers::unsupported));
        entries.insert(OpCode::CreateContainer, Entry::Handler(handlers::unsupported));
        entries.insert(OpCode::GetContainerInfo, Entry::Handler(handlers::get_container_info));
        entries.insert(OpCode::AuthenticatePin, Entry::Handler(handlers::authenticate_pin));
        entries.insert(OpCode::GetChallenge, Entry::Handler(handlers::unsupported));
        entries.insert(OpCode::AuthenticateChallenge, Entry::Handler(handlers::unsupported));
        entries.insert(OpCode::UnblockPin, Entry::Handler(handlers::unsupported));
        entries.insert(OpCode::ChangeAuthenticator, Entry::Handler(handlers::unsupported));
        entries.insert(OpCode::Deauthenticate, Entry::Handler(handlers::deauthenticate));
        entries.insert(OpCode::CreateDirectory, Entry::Handler(handlers::unsupported));
        entries.insert(OpCode::DeleteDirectory, Entry::Handler(handlers::unsupported));
        entries.insert(OpCode::CreateFile, Entry::Handler(handlers::unsupported));
        entries.insert(OpCode::ReadFile, Entry::Handler(handlers::read_file));
        entries.insert(OpCode::WriteFile, Entry::Handler(handlers::unsupported));
        entries.insert(OpCode::DeleteFile, Entry::Handler(handlers::unsupported));
        entries.insert(OpCode::EnumFiles, Entry::Handler(handlers::enum_files));
        entries.insert(OpCode::GetFileInfo, Entry::Handler(handlers::get_file_info));
        entries.insert(OpCode::QueryFreeSpace, Entry::Handler(handlers::query_free_space));
        entries.insert(OpCode::QueryKeySizes, Entry::Handler(handlers::query_key_sizes));
        entries.insert(OpCode::SignData, Entry::Handler(handlers::sign_data));
        entries.insert(OpCode::RsaDecrypt, Entry::Handler(handlers::rsa_decrypt));

        if version >= 6 {
            entries.insert(OpCode::GetChallengeEx, Entry::Handler(handlers::unsupported));
            entries.insert(OpCode::AuthenticateEx, Entry::Handler(handlers::unsupported));
            entries.insert(OpCode::ChangeAuthenticatorEx, Entry::Handler(handlers::unsupported));
            entries.insert(OpCode::DeauthenticateEx, Entry::Handler(handlers::unsupported));
            entries.insert(
                OpCode::GetContainerProperty,
                Entry::Handler(handlers::get_container_property),
            );
            entries.insert(OpCode::SetContainerProperty, Entry::Handler(handlers::unsupported));
            entries.insert(OpCode::GetProperty, Entry::Handler(handlers::get_property));
            entries.insert(OpCode::SetProperty, Entry::Handler(handlers::unsupported));
        }

        if version >= 7 {
            for code in [
                OpCode::UnpadData,
                OpCode::MdImportSessionKey,
                OpCode::MdEncryptData,
                OpCode::ImportSessionKey,
                OpCode::GetSharedKeyHandle,
                OpCode::GetAlgorithmProperty,
                OpCode::GetKeyProperty,
                OpCode::SetKeyProperty,
                OpCode::DestroyKey,
                OpCode::ProcessEncryptedData,
                OpCode::CreateContainerEx,
            ] {
                entries.insert(code, Entry::Handler(handlers::unsupported));
            }
        }

        OperationTable { entries }
    }

    /// Whether `code` is installed for the negotiated version.
    pub fn supports(&self, code: OpCode) -> bool {
        self.entries.contains_key(&code)
    }

    /// Installed operation codes, in declaration order of the table.
    pub fn installed(&self) -> impl Iterator<Item = OpCode> + '_ {
        self.entries.keys().copied()
    }

    fn entry(&self, code: OpCode) -> Option<Entry<S>> {
        self.entries.get(&code).copied()
    }
}

impl<S: TokenSession> AdapterContext<S> {
    /// Route one request through the operation table.
    ///
    /// Operations absent from the negotiated version fail with
    /// `UnsupportedFeature`; the host is expected to consult the version
    /// before calling.
    pub fn call(&mut self, operation: Operation<'_>) -> Result<Reply, Status> {
        let code = operation.code();
        trace!(?code, "dispatch");
        let _guard = self.host.lock_guard();
        match self.table.entry(code) {
            Some(Entry::Handler(handler)) => handler(self, operation),
            Some(Entry::Lifecycle) | None => {
                debug!(?code, "operation not installed for negotiated version");
                Err(Status::UnsupportedFeature)
            }
        }
    }
}

fn check_struct_version(version: &mut u32, current: u32) -> Result<(), Status> {
    if *version > current {
        return Err(Status::RevisionMismatch);
    }
    *version = current;
    Ok(())
}

mod handlers {
    use super::*;
    use crate::blob;

    pub(super) fn unsupported<S: TokenSession>(
        _ctx: &mut AdapterContext<S>,
        op: Operation<'_>,
    ) -> Result<Reply, Status> {
        debug!(code = ?op.code(), "unsupported operation");
        Err(Status::UnsupportedFeature)
    }

    pub(super) fn query_capabilities<S: TokenSession>(
        _ctx: &mut AdapterContext<S>,
        op: Operation<'_>,
    ) -> Result<Reply, Status> {
        let Operation::QueryCapabilities { capabilities } = op else {
            return Err(Status::Unexpected);
        };
        check_struct_version(&mut capabilities.version, props::CAPABILITIES_VERSION)?;
        *capabilities = props::capabilities();
        Ok(Reply::None)
    }

    pub(super) fn get_container_info<S: TokenSession>(
        ctx: &mut AdapterContext<S>,
        op: Operation<'_>,
    ) -> Result<Reply, Status> {
        let Operation::GetContainerInfo { index, flags, info } = op else {
            return Err(Status::Unexpected);
        };
        if flags != 0 {
            return Err(Status::InvalidParameter);
        }
        if info.version > props::CONTAINER_INFO_VERSION {
            return Err(Status::RevisionMismatch);
        }

        let private_key =
            containers::at(&ctx.session, usize::from(index))?.ok_or(Status::NoKeyContainer)?;

        info.version = props::CONTAINER_INFO_VERSION;
        info.sig_public_key = None;
        info.key_ex_public_key = None;

        let id = ctx
            .session
            .attribute(private_key, AttributeId::Id)?
            .ok_or(Status::Unexpected)?;
        trace!(index, id = %hex::encode(&id), "public key lookup");
        let public_key = ctx
            .session
            .find_by_id(ObjectClass::PublicKey, &id)?
            .ok_or(Status::Unexpected)?;

        let blob = blob::encode_public_key(&ctx.host, &ctx.session, public_key)?;
        debug!(index, blob_len = blob.len(), "container info encoded");
        info.key_ex_public_key = Some(blob);
        Ok(Reply::None)
    }

    pub(super) fn authenticate_pin<S: TokenSession>(
        _ctx: &mut AdapterContext<S>,
        op: Operation<'_>,
    ) -> Result<Reply, Status> {
        let Operation::AuthenticatePin { user, pin } = op else {
            return Err(Status::Unexpected);
        };
        // PIN verification belongs to the token stack; this entry only
        // acknowledges the call.
        debug!(user, pin_len = pin.len(), "authenticate pin");
        Ok(Reply::None)
    }

    pub(super) fn deauthenticate<S: TokenSession>(
        _ctx: &mut AdapterContext<S>,
        op: Operation<'_>,
    ) -> Result<Reply, Status> {
        let Operation::Deauthenticate { user, flags } = op else {
            return Err(Status::Unexpected);
        };
        debug!(user, flags, "deauthenticate");
        Ok(Reply::None)
    }

    pub(super) fn read_file<S: TokenSession>(
        ctx: &mut AdapterContext<S>,
        op: Operation<'_>,
    ) -> Result<Reply, Status> {
        let Operation::ReadFile { directory, file, flags } = op else {
            return Err(Status::Unexpected);
        };
        if file.is_empty() {
            return Err(Status::InvalidParameter);
        }
        vfs::resolve_directory(directory)?;
        vfs::check_name(file)?;
        if flags != 0 {
            return Err(Status::InvalidParameter);
        }

        let content = vfs::read_file(&ctx.session, directory, file)?;
        trace!(?directory, file, len = content.len(), "file read");
        Ok(Reply::Data(ctx.host.alloc_copy(&content)?))
    }

    pub(super) fn enum_files<S: TokenSession>(
        ctx: &mut AdapterContext<S>,
        op: Operation<'_>,
    ) -> Result<Reply, Status> {
        let Operation::EnumFiles { directory, flags } = op else {
            return Err(Status::Unexpected);
        };
        vfs::resolve_directory(directory)?;
        if flags != 0 {
            return Err(Status::InvalidParameter);
        }

        let listing = vfs::enum_files(&ctx.session, directory)?;
        Ok(Reply::Data(ctx.host.alloc_copy(&listing)?))
    }

    pub(super) fn get_file_info<S: TokenSession>(
        ctx: &mut AdapterContext<S>,
        op: Operation<'_>,
    ) -> Result<Reply, Status> {
        let Operation::GetFileInfo { directory, file, info } = op else {
            return Err(Status::Unexpected);
        };
        check_struct_version(&mut info.version, FILE_INFO_VERSION)?;
        if file.is_empty() {
            return Err(Status::InvalidParameter);
        }
        vfs::resolve_directory(directory)?;
        vfs::check_name(file)?;

        // The size is the read path's answer, never an estimate.
        let content = vfs::read_file(&ctx.session, directory, file)?;
        info.size = u32::try_from(content.len()).map_err(|_| Status::Unexpected)?;
        info.access = AccessCondition::EveryoneReadUserWrite;
        Ok(Reply::None)
    }

    pub(super) fn query_free_space<S: TokenSession>(
        ctx: &mut AdapterContext<S>,
        op: Operation<'_>,
    ) -> Result<Reply, Status> {
        let Operation::QueryFreeSpace { flags, info } = op else {
            return Err(Status::Unexpected);
        };
        if flags != 0 {
            return Err(Status::InvalidParameter);
        }
        check_struct_version(&mut info.version, props::FREE_SPACE_INFO_VERSION)?;
        *info = props::free_space(&ctx.session)?;
        Ok(Reply::None)
    }

    pub(super) fn query_key_sizes<S: TokenSession>(
        _ctx: &mut AdapterContext<S>,
        op: Operation<'_>,
    ) -> Result<Reply, Status> {
        let Operation::QueryKeySizes { key_spec, flags, sizes } = op else {
            return Err(Status::Unexpected);
        };
        const KNOWN: [u32; 9] = [
            0,
            props::AT_KEYEXCHANGE,
            props::AT_SIGNATURE,
            props::AT_ECDHE_P256,
            props::AT_ECDHE_P384,
            props::AT_ECDHE_P521,
            props::AT_ECDSA_P256,
            props::AT_ECDSA_P384,
            props::AT_ECDSA_P521,
        ];
        if !KNOWN.contains(&key_spec) {
            return Err(Status::InvalidParameter);
        }
        if flags != 0 {
            return Err(Status::InvalidParameter);
        }
        check_struct_version(&mut sizes.version, props::KEY_SIZES_VERSION)?;
        *sizes = props::key_sizes(key_spec)?;
        Ok(Reply::None)
    }

    pub(super) fn sign_data<S: TokenSession>(
        _ctx: &mut AdapterContext<S>,
        op: Operation<'_>,
    ) -> Result<Reply, Status> {
        let Operation::SignData { container } = op else {
            return Err(Status::Unexpected);
        };
        // Signature execution is the token stack's concern.
        debug!(container, "sign data acknowledged");
        Ok(Reply::None)
    }

    pub(super) fn rsa_decrypt<S: TokenSession>(
        _ctx: &mut AdapterContext<S>,
        op: Operation<'_>,
    ) -> Result<Reply, Status> {
        let Operation::RsaDecrypt { container } = op else {
            return Err(Status::Unexpected);
        };
        debug!(container, "rsa decrypt acknowledged");
        Ok(Reply::None)
    }

    pub(super) fn get_property<S: TokenSession>(
        ctx: &mut AdapterContext<S>,
        op: Operation<'_>,
    ) -> Result<Reply, Status> {
        let Operation::GetProperty { name, flags, dest } = op else {
            return Err(Status::Unexpected);
        };
        let written = props::card_property(&ctx.session, name, flags, dest)?;
        Ok(Reply::Written(written))
    }

    pub(super) fn get_container_property<S: TokenSession>(
        ctx: &mut AdapterContext<S>,
        op: Operation<'_>,
    ) -> Result<Reply, Status> {
        let Operation::GetContainerProperty { index, name, flags, dest } = op else {
            return Err(Status::Unexpected);
        };
        let written = props::container_property(&ctx.session, index, name, flags, dest)?;
        Ok(Reply::Written(written))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::acquire_context;
    use crate::host::HostDescriptor;
    use crate::token::{SoftConnector, SoftToken};

    const SERIAL: [u8; 16] = *b"DECC0100123456  ";
    const ATR: [u8; 4] = [0x3b, 0x8e, 0x80, 0x01];

    fn context_at(version: u32) -> (SoftToken, AdapterContext<SoftToken>) {
        let token = SoftToken::new(SERIAL);
        token.add_rsa_key(b"\x01", &[0x42; 256], b"cert one");
        let connector = SoftConnector::new(token.clone());
        let mut desc = HostDescriptor::new("test card", &ATR, 7);
        desc.requested_version = version;
        let ctx = acquire_context(&connector, &mut desc, 0).unwrap();
        (token, ctx)
    }

    #[test]
    fn table_gates_property_operations_by_version() {
        let (_, ctx4) = context_at(4);
        assert!(!ctx4.operations().supports(OpCode::GetProperty));
        assert!(!ctx4.operations().supports(OpCode::UnpadData));
        assert!(ctx4.operations().supports(OpCode::ReadFile));
        assert!(ctx4.operations().supports(OpCode::DeleteContext));

        let (_, ctx6) = context_at(6);
        assert!(ctx6.operations().supports(OpCode::GetProperty));
        assert!(!ctx6.operations().supports(OpCode::UnpadData));

        let (_, ctx7) = context_at(7);
        assert!(ctx7.operations().supports(OpCode::UnpadData));
    }

    #[test]
    fn key_agreement_entries_are_never_installed() {
        for version in [4, 5, 6, 7] {
            let (_, ctx) = context_at(version);
            assert!(!ctx.operations().supports(OpCode::ConstructDhAgreement));
            assert!(!ctx.operations().supports(OpCode::DeriveKey));
            assert!(!ctx.operations().supports(OpCode::DestroyDhAgreement));
        }
    }

    #[test]
    fn uninstalled_operations_fail_uniformly() {
        let (_, mut ctx4) = context_at(4);
        let mut dest = [0u8; 4];
        let err = ctx4
            .call(Operation::GetProperty {
                name: props::names::READ_ONLY,
                flags: 0,
                dest: &mut dest,
            })
            .unwrap_err();
        assert_eq!(err, Status::UnsupportedFeature);
    }

    #[test]
    fn stub_operations_fail_with_unsupported_feature() {
        let (_, mut ctx) = context_at(7);
        for op in [
            Operation::CreateContainer,
            Operation::WriteFile,
            Operation::SetProperty,
            Operation::DestroyKey,
        ] {
            assert_eq!(ctx.call(op).unwrap_err(), Status::UnsupportedFeature);
        }
    }

    #[test]
    fn capabilities_normalize_the_structure_version() {
        let (_, mut ctx) = context_at(7);
        let mut caps = CardCapabilities { version: 0, ..CardCapabilities::default() };
        ctx.call(Operation::QueryCapabilities { capabilities: &mut caps }).unwrap();
        assert_eq!(caps.version, props::CAPABILITIES_VERSION);
        assert!(caps.certificate_compression);
        assert!(!caps.key_generation);
    }

    #[test]
    fn over_versioned_structures_mismatch_untouched() {
        let (_, mut ctx) = context_at(7);
        let mut info = FreeSpaceInfo { version: 99, ..FreeSpaceInfo::default() };
        let err = ctx
            .call(Operation::QueryFreeSpace { flags: 0, info: &mut info })
            .unwrap_err();
        assert_eq!(err, Status::RevisionMismatch);
        assert_eq!(info.version, 99);
    }

    #[test]
    fn free_space_requires_zero_flags() {
        let (_, mut ctx) = context_at(7);
        let mut info = FreeSpaceInfo::default();
        let err = ctx
            .call(Operation::QueryFreeSpace { flags: 2, info: &mut info })
            .unwrap_err();
        assert_eq!(err, Status::InvalidParameter);
    }

    #[test]
    fn read_file_validates_in_order() {
        let (_, mut ctx) = context_at(7);
        // Empty file name: parameter error before anything else.
        assert_eq!(
            ctx.call(Operation::ReadFile { directory: None, file: "", flags: 0 })
                .unwrap_err(),
            Status::InvalidParameter
        );
        // Unknown directory beats unknown file.
        assert_eq!(
            ctx.call(Operation::ReadFile { directory: Some("nope"), file: "cardid", flags: 0 })
                .unwrap_err(),
            Status::DirectoryNotFound
        );
        // Bad flags after the names are vetted.
        assert_eq!(
            ctx.call(Operation::ReadFile { directory: None, file: "cardid", flags: 1 })
                .unwrap_err(),
            Status::InvalidParameter
        );
    }

    #[test]
    fn read_file_returns_host_owned_content() {
        let (_, mut ctx) = context_at(7);
        let reply = ctx
            .call(Operation::ReadFile { directory: None, file: "cardid", flags: 0 })
            .unwrap();
        let buf = reply.into_data().unwrap();
        assert_eq!(buf.as_slice(), SERIAL);
    }

    #[test]
    fn get_file_info_size_matches_read() {
        let (_, mut ctx) = context_at(7);
        let mut info = FileInfo::default();
        ctx.call(Operation::GetFileInfo {
            directory: Some("mscp"),
            file: "cmapfile",
            info: &mut info,
        })
        .unwrap();
        assert_eq!(info.size, 86);
        assert_eq!(info.access, AccessCondition::EveryoneReadUserWrite);

        let read = ctx
            .call(Operation::ReadFile { directory: Some("mscp"), file: "cmapfile", flags: 0 })
            .unwrap()
            .into_data()
            .unwrap();
        assert_eq!(read.len() as u32, info.size);
    }

    #[test]
    fn container_info_carries_the_key_exchange_blob() {
        let (_, mut ctx) = context_at(7);
        let mut info = ContainerInfo::new();
        ctx.call(Operation::GetContainerInfo { index: 0, flags: 0, info: &mut info })
            .unwrap();
        assert!(info.sig_public_key.is_none());
        let blob = info.key_ex_public_key.unwrap();
        assert_eq!(blob.len(), crate::blob::RSA_HEADER_LEN + 256);

        let mut missing = ContainerInfo::new();
        assert_eq!(
            ctx.call(Operation::GetContainerInfo { index: 3, flags: 0, info: &mut missing })
                .unwrap_err(),
            Status::NoKeyContainer
        );
    }

    #[test]
    fn key_sizes_validate_spec_then_flags() {
        let (_, mut ctx) = context_at(7);
        let mut sizes = KeySizes::default();
        assert_eq!(
            ctx.call(Operation::QueryKeySizes { key_spec: 42, flags: 0, sizes: &mut sizes })
                .unwrap_err(),
            Status::InvalidParameter
        );
        assert_eq!(
            ctx.call(Operation::QueryKeySizes {
                key_spec: props::AT_ECDSA_P521,
                flags: 0,
                sizes: &mut sizes
            })
            .unwrap_err(),
            Status::UnsupportedFeature
        );
        ctx.call(Operation::QueryKeySizes {
            key_spec: props::AT_SIGNATURE,
            flags: 0,
            sizes: &mut sizes,
        })
        .unwrap();
        assert_eq!(sizes.maximum_bits, 2048);
    }

    #[test]
    fn authentication_entries_acknowledge_without_token_calls() {
        let (_, mut ctx) = context_at(7);
        ctx.call(Operation::AuthenticatePin { user: "user", pin: b"123456" }).unwrap();
        ctx.call(Operation::Deauthenticate { user: "user", flags: 0 }).unwrap();
        ctx.call(Operation::SignData { container: 0 }).unwrap();
        ctx.call(Operation::RsaDecrypt { container: 0 }).unwrap();
    }

    #[test]
    fn live_store_changes_appear_without_reacquisition() {
        let (token, mut ctx) = context_at(7);
        let before = ctx
            .call(Operation::EnumFiles { directory: Some("mscp"), flags: 0 })
            .unwrap()
            .into_data()
            .unwrap();
        assert_eq!(vfs::split_multistring(&before), ["cmapfile", "kxc00"]);

        token.add_rsa_key(b"\x02", &[0x42; 128], b"cert two");
        let after = ctx
            .call(Operation::EnumFiles { directory: Some("mscp"), flags: 0 })
            .unwrap()
            .into_data()
            .unwrap();
        assert_eq!(vfs::split_multistring(&after), ["cmapfile", "kxc00", "kxc01"]);
    }
}
