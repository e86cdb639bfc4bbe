//! End-to-end tests driving the adapter the way a host framework would:
//! acquire a context, walk the virtual tree, interrogate properties, and
//! tear down.

use cardbridge_core::containers::RECORD_LEN;
use cardbridge_core::dispatch::{ContainerInfo, FileInfo};
use cardbridge_core::host::HostDescriptor;
use cardbridge_core::props::{self, names};
use cardbridge_core::token::{PinRole, SoftConnector, SoftToken};
use cardbridge_core::vfs::split_multistring;
use cardbridge_core::{AdapterContext, Operation, Status, acquire_context, delete_context};
use hex_literal::hex;

const SERIAL: [u8; 16] = hex!("00112233445566778899aabbccddeeff");
const ATR: [u8; 5] = [0x3b, 0x8e, 0x80, 0x01, 0x83];

fn acquire(token: &SoftToken) -> AdapterContext<SoftToken> {
    let connector = SoftConnector::new(token.clone());
    let mut descriptor = HostDescriptor::new("cardbridge test card", &ATR, 0xca7d);
    acquire_context(&connector, &mut descriptor, 0).expect("acquisition failed")
}

fn read(ctx: &mut AdapterContext<SoftToken>, dir: Option<&str>, file: &str) -> Vec<u8> {
    ctx.call(Operation::ReadFile { directory: dir, file, flags: 0 })
        .unwrap()
        .into_data()
        .unwrap()
        .as_slice()
        .to_vec()
}

#[test]
fn single_key_card_walkthrough() {
    // One private key with a 4-byte identifier: the documented scenario.
    let token = SoftToken::new(SERIAL);
    token.add_rsa_key(&hex!("01020304"), &[0x42; 256], b"-----DER CERT-----");
    let mut ctx = acquire(&token);

    // cardid is the serial, byte for byte.
    assert_eq!(read(&mut ctx, None, "cardid"), SERIAL);

    // The application directory holds the map and exactly one certificate.
    let listing = ctx
        .call(Operation::EnumFiles { directory: Some("mscp"), flags: 0 })
        .unwrap()
        .into_data()
        .unwrap();
    assert_eq!(split_multistring(&listing), ["cmapfile", "kxc00"]);

    // The GUID folds the short identifier into the low serial bytes.
    let map = read(&mut ctx, Some("mscp"), "cmapfile");
    assert_eq!(map.len(), RECORD_LEN);
    let guid: String = map[..72]
        .chunks(2)
        .map(|unit| char::from(unit[0]))
        .collect();
    assert_eq!(guid, "00112233-4455-6677-8899-aabbcddfedfb");
    assert_eq!(map[80], 0b11); // valid + default
    assert_eq!(&map[84..86], &2048u16.to_le_bytes());

    assert_eq!(read(&mut ctx, Some("mscp"), "kxc00"), b"-----DER CERT-----");

    delete_context(ctx);
}

#[test]
fn counts_agree_across_views() {
    let token = SoftToken::new(SERIAL);
    for i in 0u8..4 {
        token.add_rsa_key(&[0x10 + i], &[0x42; 256], b"cert");
    }
    let mut ctx = acquire(&token);

    let listing = ctx
        .call(Operation::EnumFiles { directory: Some("mscp"), flags: 0 })
        .unwrap()
        .into_data()
        .unwrap();
    let names_in_dir = split_multistring(&listing);
    let cert_files = names_in_dir.iter().filter(|n| n.starts_with("kxc")).count();

    let map = read(&mut ctx, Some("mscp"), "cmapfile");
    let records = map.len() / RECORD_LEN;

    let mut dest = [0u8; 16];
    ctx.call(Operation::GetProperty { name: names::FREE_SPACE, flags: 0, dest: &mut dest })
        .unwrap();
    let max_containers = u32::from_le_bytes(dest[12..16].try_into().unwrap());

    assert_eq!(cert_files, 4);
    assert_eq!(records, 4);
    assert_eq!(max_containers, 4);
}

#[test]
fn ec_container_info_round_trip() {
    let token = SoftToken::new(SERIAL);
    let coordinates = [0x7e; 64];
    token.add_p256_key(b"ec-key", &coordinates, b"ec cert");
    let mut ctx = acquire(&token);

    let mut info = ContainerInfo::new();
    ctx.call(Operation::GetContainerInfo { index: 0, flags: 0, info: &mut info })
        .unwrap();
    let blob = info.key_ex_public_key.expect("key exchange blob");
    assert_eq!(blob.len(), 8 + 64);
    assert_eq!(&blob[..4], b"ECK1");
    assert_eq!(&blob[8..], &coordinates[..]);
}

#[test]
fn properties_reflect_authentication_state() {
    let token = SoftToken::new(SERIAL);
    token.add_rsa_key(b"\x01", &[0x42; 256], b"cert");
    let mut ctx = acquire(&token);

    let mut dest = [0u8; 4];
    ctx.call(Operation::GetProperty {
        name: names::AUTHENTICATED_STATE,
        flags: 0,
        dest: &mut dest,
    })
    .unwrap();
    assert_eq!(u32::from_le_bytes(dest), 0);

    token.set_authenticated(Some(PinRole::User));
    ctx.call(Operation::GetProperty {
        name: names::AUTHENTICATED_STATE,
        flags: 0,
        dest: &mut dest,
    })
    .unwrap();
    assert_eq!(u32::from_le_bytes(dest), 2);
}

#[test]
fn property_buffer_contract() {
    let token = SoftToken::new(SERIAL);
    let mut ctx = acquire(&token);

    // Unknown property: parameter error, destination untouched.
    let mut dest = [0xAA; 8];
    assert_eq!(
        ctx.call(Operation::GetProperty { name: "No Such Thing", flags: 0, dest: &mut dest })
            .unwrap_err(),
        Status::InvalidParameter
    );
    assert_eq!(dest, [0xAA; 8]);

    // Known property, undersized destination: the exact requirement comes
    // back and the destination is untouched.
    assert_eq!(
        ctx.call(Operation::GetProperty {
            name: names::PIN_INFO,
            flags: PinRole::User.id(),
            dest: &mut dest,
        })
        .unwrap_err(),
        Status::InsufficientBuffer { required: props::PinInfo::ENCODED_LEN }
    );
    assert_eq!(dest, [0xAA; 8]);
}

#[test]
fn file_info_follows_live_content() {
    let token = SoftToken::new(SERIAL);
    token.add_rsa_key(b"\x01", &[0x42; 256], b"cert");
    let mut ctx = acquire(&token);

    let mut info = FileInfo::default();
    ctx.call(Operation::GetFileInfo {
        directory: Some("mscp"),
        file: "cmapfile",
        info: &mut info,
    })
    .unwrap();
    assert_eq!(info.size as usize, RECORD_LEN);

    token.add_rsa_key(b"\x02", &[0x42; 256], b"cert");
    let mut info = FileInfo::default();
    ctx.call(Operation::GetFileInfo {
        directory: Some("mscp"),
        file: "cmapfile",
        info: &mut info,
    })
    .unwrap();
    assert_eq!(info.size as usize, 2 * RECORD_LEN);
}

#[test]
fn serial_is_stripped_for_the_serial_property_only() {
    let token = SoftToken::new(*b"CARD42          ");
    let mut ctx = acquire(&token);

    let mut guid = [0u8; 16];
    ctx.call(Operation::GetProperty { name: names::CARD_GUID, flags: 0, dest: &mut guid })
        .unwrap();
    assert_eq!(&guid, b"CARD42          ");

    let mut serial = [0u8; 16];
    let reply = ctx
        .call(Operation::GetProperty { name: names::SERIAL_NUMBER, flags: 0, dest: &mut serial })
        .unwrap();
    match reply {
        cardbridge_core::Reply::Written(len) => {
            assert_eq!(&serial[..len], b"CARD42");
        }
        other => panic!("unexpected reply: {other:?}"),
    }
}
