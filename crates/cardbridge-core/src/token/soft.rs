//! In-memory token for tests, the diagnostic CLI, and in-process hosts.
//!
//! The store lives behind a shared handle: cloning a [`SoftToken`] yields a
//! second view onto the same objects, so a test (or tool) can add and remove
//! keys while an adapter context holds a session, exercising the
//! recompute-on-every-call contract of the translation layer.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::{
    AttributeId, CardBinding, ObjectClass, ObjectId, PinRole, SERIAL_NUMBER_LEN, TokenConnector,
    TokenError, TokenInfo, TokenSession,
};
use crate::blob::P256_PARAMS_DER;

/// One object in the soft store.
#[derive(Debug, Clone)]
pub struct SoftObject {
    class: ObjectClass,
    attributes: BTreeMap<AttributeId, Vec<u8>>,
    key_size_bits: u32,
}

impl SoftObject {
    pub fn new(class: ObjectClass) -> Self {
        SoftObject {
            class,
            attributes: BTreeMap::new(),
            key_size_bits: 0,
        }
    }

    pub fn with_attribute(mut self, attribute: AttributeId, value: &[u8]) -> Self {
        self.attributes.insert(attribute, value.to_vec());
        self
    }

    pub fn with_key_size_bits(mut self, bits: u32) -> Self {
        self.key_size_bits = bits;
        self
    }
}

struct SoftState {
    info: TokenInfo,
    objects: Vec<(ObjectId, SoftObject)>,
    next_id: u64,
    authenticated: Option<PinRole>,
}

/// Shared-handle in-memory token implementing [`TokenSession`].
#[derive(Clone)]
pub struct SoftToken {
    state: Arc<Mutex<SoftState>>,
}

impl SoftToken {
    pub fn new(serial_number: [u8; SERIAL_NUMBER_LEN]) -> Self {
        SoftToken {
            state: Arc::new(Mutex::new(SoftState {
                info: TokenInfo {
                    serial_number,
                    protected_authentication_path: false,
                },
                objects: Vec::new(),
                next_id: 1,
                authenticated: None,
            })),
        }
    }

    pub fn with_protected_authentication_path(self) -> Self {
        self.state
            .lock()
            .expect("soft token state poisoned")
            .info
            .protected_authentication_path = true;
        self
    }

    /// Add a raw object and return its handle.
    pub fn add_object(&self, object: SoftObject) -> ObjectId {
        let mut state = self.state.lock().expect("soft token state poisoned");
        let id = ObjectId(state.next_id);
        state.next_id += 1;
        state.objects.push((id, object));
        id
    }

    /// Add a private key / public key / certificate triple for an RSA key.
    pub fn add_rsa_key(&self, id: &[u8], modulus: &[u8], certificate_der: &[u8]) {
        let bits = u32::try_from(modulus.len() * 8).unwrap_or(u32::MAX);
        self.add_object(
            SoftObject::new(ObjectClass::PrivateKey)
                .with_attribute(AttributeId::Id, id)
                .with_key_size_bits(bits),
        );
        self.add_object(
            SoftObject::new(ObjectClass::PublicKey)
                .with_attribute(AttributeId::Id, id)
                .with_attribute(AttributeId::Modulus, modulus)
                .with_key_size_bits(bits),
        );
        self.add_object(
            SoftObject::new(ObjectClass::Certificate)
                .with_attribute(AttributeId::Id, id)
                .with_attribute(AttributeId::Value, certificate_der),
        );
    }

    /// Add a private key / public key / certificate triple for a P-256 key.
    /// `coordinates` are the 64 raw bytes of the uncompressed point.
    pub fn add_p256_key(&self, id: &[u8], coordinates: &[u8; 64], certificate_der: &[u8]) {
        let mut point = Vec::with_capacity(67);
        point.extend_from_slice(&[0x04, 0x41, 0x04]);
        point.extend_from_slice(coordinates);
        self.add_object(
            SoftObject::new(ObjectClass::PrivateKey)
                .with_attribute(AttributeId::Id, id)
                .with_key_size_bits(256),
        );
        self.add_object(
            SoftObject::new(ObjectClass::PublicKey)
                .with_attribute(AttributeId::Id, id)
                .with_attribute(AttributeId::EcParams, &P256_PARAMS_DER)
                .with_attribute(AttributeId::EcPoint, &point)
                .with_key_size_bits(256),
        );
        self.add_object(
            SoftObject::new(ObjectClass::Certificate)
                .with_attribute(AttributeId::Id, id)
                .with_attribute(AttributeId::Value, certificate_der),
        );
    }

    /// Remove every object whose identifier attribute equals `id`.
    pub fn remove_key(&self, id: &[u8]) {
        let mut state = self.state.lock().expect("soft token state poisoned");
        state
            .objects
            .retain(|(_, obj)| obj.attributes.get(&AttributeId::Id).map(Vec::as_slice) != Some(id));
    }

    /// Mark the session authenticated (or not) for `role`.
    pub fn set_authenticated(&self, role: Option<PinRole>) {
        self.state
            .lock()
            .expect("soft token state poisoned")
            .authenticated = role;
    }
}

impl TokenSession for SoftToken {
    fn info(&self) -> Result<TokenInfo, TokenError> {
        Ok(self
            .state
            .lock()
            .map_err(|_| TokenError::SessionClosed)?
            .info
            .clone())
    }

    fn private_keys(&self) -> Result<Vec<ObjectId>, TokenError> {
        let state = self.state.lock().map_err(|_| TokenError::SessionClosed)?;
        Ok(state
            .objects
            .iter()
            .filter(|(_, obj)| obj.class == ObjectClass::PrivateKey)
            .map(|(id, _)| *id)
            .collect())
    }

    fn attribute(
        &self,
        object: ObjectId,
        attribute: AttributeId,
    ) -> Result<Option<Vec<u8>>, TokenError> {
        let state = self.state.lock().map_err(|_| TokenError::SessionClosed)?;
        let (_, obj) = state
            .objects
            .iter()
            .find(|(id, _)| *id == object)
            .ok_or(TokenError::SessionClosed)?;
        Ok(obj.attributes.get(&attribute).cloned())
    }

    fn key_size_bits(&self, object: ObjectId) -> Result<u32, TokenError> {
        let state = self.state.lock().map_err(|_| TokenError::SessionClosed)?;
        let (_, obj) = state
            .objects
            .iter()
            .find(|(id, _)| *id == object)
            .ok_or(TokenError::SessionClosed)?;
        Ok(obj.key_size_bits)
    }

    fn find_by_id(
        &self,
        class: ObjectClass,
        id: &[u8],
    ) -> Result<Option<ObjectId>, TokenError> {
        let state = self.state.lock().map_err(|_| TokenError::SessionClosed)?;
        Ok(state
            .objects
            .iter()
            .find(|(_, obj)| {
                obj.class == class
                    && obj.attributes.get(&AttributeId::Id).map(Vec::as_slice) == Some(id)
            })
            .map(|(oid, _)| *oid))
    }

    fn authenticated_role(&self) -> Result<Option<PinRole>, TokenError> {
        Ok(self
            .state
            .lock()
            .map_err(|_| TokenError::SessionClosed)?
            .authenticated)
    }
}

/// Connector handing out sessions onto one shared soft token.
#[derive(Clone)]
pub struct SoftConnector {
    token: SoftToken,
    fail_open: bool,
}

impl SoftConnector {
    pub fn new(token: SoftToken) -> Self {
        SoftConnector {
            token,
            fail_open: false,
        }
    }

    /// A connector whose `open` always fails, for acquisition-failure tests.
    pub fn failing(token: SoftToken) -> Self {
        SoftConnector {
            token,
            fail_open: true,
        }
    }
}

impl TokenConnector for SoftConnector {
    type Session = SoftToken;

    fn open(&self, _binding: CardBinding) -> Result<SoftToken, TokenError> {
        if self.fail_open {
            return Err(TokenError::Transport("card is mute".into()));
        }
        Ok(self.token.clone())
    }
}
