#![deny(unsafe_code)]

//! Diagnostic shell around the adapter: builds an in-memory token, binds a
//! context to it, and dumps what a host framework would see: the virtual
//! tree, the decoded container map, and the property catalogue.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use comfy_table::{Table, presets::UTF8_FULL_CONDENSED};
use tracing_subscriber::EnvFilter;

use cardbridge_core::containers::{ContainerFlags, RECORD_LEN};
use cardbridge_core::host::HostDescriptor;
use cardbridge_core::props::names;
use cardbridge_core::token::{SoftConnector, SoftToken};
use cardbridge_core::vfs::{self, split_multistring};
use cardbridge_core::{AdapterContext, Operation, Status, acquire_context, delete_context};

/// Demo 2048-bit modulus pattern for keys loaded via `--key`.
const DEMO_MODULUS: [u8; 256] = [0x42; 256];
const DEMO_ATR: [u8; 5] = [0x3b, 0x8e, 0x80, 0x01, 0x83];

/// Inspect the virtual card file system served for an in-memory token
#[derive(Parser)]
#[command(name = "cardbridge")]
#[command(author, version)]
#[command(after_help = "EXAMPLES:
    # Virtual tree for a card with two keys
    cardbridge --key 0102 --key a1b2c3d4 tree

    # Decoded container map
    cardbridge --key 0102 cmap

    # Full property catalogue
    cardbridge props
")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Token serial number, exactly 16 bytes of hex
    #[arg(long, default_value = "00112233445566778899aabbccddeeff")]
    serial: String,

    /// Load a demo RSA key with this hex identifier (repeatable)
    #[arg(long = "key", value_name = "ID_HEX")]
    keys: Vec<String>,

    /// Mark the token as authenticated for the user role
    #[arg(long)]
    authenticated: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every virtual file with its size
    Tree,
    /// Decode the container map records
    Cmap,
    /// Dump the property catalogue
    Props,
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();
}

fn build_token(cli: &Cli) -> Result<SoftToken> {
    let serial_bytes = hex::decode(&cli.serial).context("serial is not valid hex")?;
    let serial: [u8; 16] = serial_bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("serial must be exactly 16 bytes"))?;

    let token = SoftToken::new(serial);
    for (i, id_hex) in cli.keys.iter().enumerate() {
        let id = hex::decode(id_hex).with_context(|| format!("key id '{id_hex}' is not hex"))?;
        if id.is_empty() {
            bail!("key id must not be empty");
        }
        let cert = format!("demo certificate for container {i:02}");
        token.add_rsa_key(&id, &DEMO_MODULUS, cert.as_bytes());
    }
    if cli.authenticated {
        token.set_authenticated(Some(cardbridge_core::token::PinRole::User));
    }
    Ok(token)
}

fn read_file(
    ctx: &mut AdapterContext<SoftToken>,
    dir: Option<&str>,
    file: &str,
) -> Result<Vec<u8>, Status> {
    Ok(ctx
        .call(Operation::ReadFile { directory: dir, file, flags: 0 })?
        .into_data()
        .map(|buf| buf.as_slice().to_vec())
        .unwrap_or_default())
}

fn enum_dir(ctx: &mut AdapterContext<SoftToken>, dir: Option<&str>) -> Result<Vec<String>, Status> {
    let listing = ctx
        .call(Operation::EnumFiles { directory: dir, flags: 0 })?
        .into_data()
        .map(|buf| buf.as_slice().to_vec())
        .unwrap_or_default();
    Ok(split_multistring(&listing))
}

fn cmd_tree(ctx: &mut AdapterContext<SoftToken>) -> Result<()> {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(["path", "size", "preview"]);

    for dir in [None, Some(vfs::APPLICATION_DIRECTORY)] {
        for file in enum_dir(ctx, dir)? {
            let content = read_file(ctx, dir, &file)?;
            let path = match dir {
                None => file.clone(),
                Some(d) => format!("{d}/{file}"),
            };
            let preview = hex::encode(&content[..content.len().min(16)]);
            table.add_row([path, content.len().to_string(), preview]);
        }
    }
    println!("{table}");
    Ok(())
}

fn cmd_cmap(ctx: &mut AdapterContext<SoftToken>) -> Result<()> {
    let map = read_file(ctx, Some(vfs::APPLICATION_DIRECTORY), vfs::CONTAINER_MAP_FILE)?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(["index", "guid", "flags", "sig bits", "kx bits"]);

    for (index, record) in map.chunks(RECORD_LEN).enumerate() {
        let guid: String = record[..72]
            .chunks(2)
            .map(|unit| char::from(unit[0]))
            .take_while(|&c| c != '\0')
            .collect();
        let flags = ContainerFlags::from_bits_truncate(record[80]);
        let sig = u16::from_le_bytes([record[82], record[83]]);
        let kx = u16::from_le_bytes([record[84], record[85]]);
        table.add_row([
            index.to_string(),
            guid,
            format!("{flags:?}"),
            sig.to_string(),
            kx.to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn cmd_props(ctx: &mut AdapterContext<SoftToken>) -> Result<()> {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(["property", "size", "value"]);

    let mut dest = vec![0u8; 256];
    for name in cardbridge_core::props::CARD_PROPERTY_NAMES {
        // Key sizes and PIN information take a selector in the flags word.
        let flags = match name {
            n if n == names::KEY_SIZES => 1,
            n if n == names::PIN_INFO => 1,
            _ => 0,
        };
        match ctx.call(Operation::GetProperty { name, flags, dest: &mut dest }) {
            Ok(cardbridge_core::Reply::Written(len)) => {
                table.add_row([name.to_string(), len.to_string(), hex::encode(&dest[..len])]);
            }
            Ok(other) => bail!("unexpected reply for '{name}': {other:?}"),
            Err(status) => {
                table.add_row([name.to_string(), "-".to_string(), format!("error: {status}")]);
            }
        }
    }
    println!("{table}");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let token = build_token(&cli)?;
    let connector = SoftConnector::new(token);
    let mut descriptor = HostDescriptor::new("cardbridge soft card", &DEMO_ATR, 1);
    let mut ctx =
        acquire_context(&connector, &mut descriptor, 0).context("context acquisition failed")?;
    tracing::debug!(version = ctx.version(), "context acquired");

    let result = match cli.command {
        Commands::Tree => cmd_tree(&mut ctx),
        Commands::Cmap => cmd_cmap(&mut ctx),
        Commands::Props => cmd_props(&mut ctx),
    };

    delete_context(ctx);
    result
}
