use std::str::FromStr;

use bitcoin::{Address, Network, Txid};
use clap::Parser;

use rbf_chain::{
    chain::{ChainEvent, ChainOrchestrator, Wallets},
    config,
    node::{CoreRpcClient, NodeClient},
    tx::{
        builder::ChainTxBuilder,
        signer::{AddressMode, PKSigner},
    },
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// path to config file
    #[arg(short, long, default_value_t = String::from("config.toml"))]
    config: String,

    #[command(subcommand)]
    subcommand: Subcommand,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    args.subcommand.run(&args.config)
}

#[derive(Debug, Parser)]
enum Subcommand {
    #[command(about = "Broadcast the parent/child transaction chain")]
    Chain(ChainCmd),

    #[command(about = "Replace a broadcast parent and return funds to wallet A")]
    KillSwitch(KillSwitchCmd),

    #[command(about = "Show confirmation status of a transaction")]
    Status(StatusCmd),

    #[command(about = "Generates new keypair")]
    GenKeypair,
}

impl Subcommand {
    fn run(&self, cfg_path: &str) -> anyhow::Result<()> {
        match self {
            Subcommand::Chain(cmd) => cmd.run(cfg_path),
            Subcommand::KillSwitch(cmd) => cmd.run(cfg_path),
            Subcommand::Status(cmd) => cmd.run(cfg_path),
            Subcommand::GenKeypair => {
                generate_keypair();
                Ok(())
            }
        }
    }
}

#[derive(Debug, clap::Parser)]
struct ChainCmd {
    /// wait for Enter once the chain is up, then fire the kill switch
    #[arg(long, default_value_t = false)]
    kill_switch: bool,
}

impl ChainCmd {
    fn run(&self, cfg_path: &str) -> anyhow::Result<()> {
        let cfg = config::read_config(cfg_path)?;
        let net = cfg.btc.get_network();

        let wallets = build_wallets(&cfg.wallets, net)?;
        let builder = ChainTxBuilder::new(cfg.fees)?;
        let node = CoreRpcClient::new(&cfg.btc)?;

        let mut orchestrator =
            ChainOrchestrator::new(node, wallets, builder, cfg.btc.min_confirmations);
        orchestrator.subscribe(Box::new(print_event));

        let parent_txid = orchestrator.create_parent()?;
        println!("PARENT TX ->> {}", parent_txid);

        let child_txid = orchestrator.create_child()?;
        println!("CHILD TX ->> {}", child_txid);
        println!("funds at: {}", orchestrator.funds_at());

        if self.kill_switch {
            println!("Press Enter to trigger the kill switch...");
            let mut line = String::new();
            std::io::stdin().read_line(&mut line)?;

            let rbf_txid = orchestrator.replace_parent()?;
            println!("REPLACEMENT TX ->> {}", rbf_txid);
            println!("funds at: {}", orchestrator.funds_at());
        }

        Ok(())
    }
}

#[derive(Debug, clap::Parser)]
struct KillSwitchCmd {
    /// txid of the broadcast parent transaction to replace
    #[arg(long)]
    parent_txid: String,
}

impl KillSwitchCmd {
    fn run(&self, cfg_path: &str) -> anyhow::Result<()> {
        let cfg = config::read_config(cfg_path)?;
        let net = cfg.btc.get_network();

        let wallets = build_wallets(&cfg.wallets, net)?;
        let builder = ChainTxBuilder::new(cfg.fees)?;
        let node = CoreRpcClient::new(&cfg.btc)?;
        let parent_txid = Txid::from_str(&self.parent_txid)?;

        let mut orchestrator = ChainOrchestrator::resume(
            node,
            wallets,
            builder,
            cfg.btc.min_confirmations,
            parent_txid,
        )?;
        orchestrator.subscribe(Box::new(print_event));

        let rbf_txid = orchestrator.replace_parent()?;
        println!("REPLACEMENT TX ->> {}", rbf_txid);
        println!("funds at: {}", orchestrator.funds_at());

        Ok(())
    }
}

#[derive(Debug, clap::Parser)]
struct StatusCmd {
    #[arg(long)]
    txid: String,
}

impl StatusCmd {
    fn run(&self, cfg_path: &str) -> anyhow::Result<()> {
        let cfg = config::read_config(cfg_path)?;
        let node = CoreRpcClient::new(&cfg.btc)?;

        let txid = Txid::from_str(&self.txid)?;
        let confirmations = node.tx_confirmations(&txid)?;
        println!("TX {} ->> {} confirmations", txid, confirmations);

        Ok(())
    }
}

fn build_wallets(cfg: &config::WalletsConfig, net: Network) -> anyhow::Result<Wallets> {
    let signer_a = PKSigner::new_from_secret(
        net,
        &cfg.a.secret_key,
        AddressMode::new_from_str(&cfg.a.mode),
    )?;
    check_address("A", &cfg.a.address, &signer_a)?;

    let signer_b = PKSigner::new_from_secret(
        net,
        &cfg.b.secret_key,
        AddressMode::new_from_str(&cfg.b.mode),
    )?;
    check_address("B", &cfg.b.address, &signer_b)?;

    let wallet_c = Address::from_str(&cfg.c.address)?.require_network(net)?;

    Ok(Wallets {
        signer_a,
        signer_b,
        wallet_c,
    })
}

fn check_address(wallet: &str, configured: &str, signer: &PKSigner) -> anyhow::Result<()> {
    if !configured.is_empty() && configured != signer.address.to_string() {
        anyhow::bail!(
            "wallet {} address mismatch: config has {}, key derives {}",
            wallet,
            configured,
            signer.address
        );
    }
    Ok(())
}

fn print_event(event: &ChainEvent) {
    match event {
        ChainEvent::ParentCreated { txid, funds_at } => {
            println!("EVENT parent-created: txid={} funds={}", txid, funds_at)
        }
        ChainEvent::ChildCreated { txid, funds_at } => {
            println!("EVENT child-created: txid={} funds={}", txid, funds_at)
        }
        ChainEvent::Replaced { txid, funds_at } => {
            println!("EVENT replaced: txid={} funds={}", txid, funds_at)
        }
        ChainEvent::Failed { reason, funds_at } => {
            println!("EVENT failed: {} (funds={})", reason, funds_at)
        }
    }
}

fn generate_keypair() {
    use bitcoin::secp256k1::Secp256k1;
    use bitcoin::PrivateKey;

    let secp = Secp256k1::new();
    let (secret_key, _) = secp.generate_keypair(&mut rand::thread_rng());
    let hex_secret = hex::encode(secret_key.secret_bytes());
    println!("secret_key:\t{}", hex_secret);

    for net in [Network::Testnet, Network::Regtest] {
        println!("{}:", net);
        let pk = PrivateKey::new(secret_key, net);
        println!("  wif:   \t{}", pk.to_wif());

        let address = Address::p2pkh(&pk.public_key(&secp), net);
        println!("  p2pkh: \t{}", address);

        let address = Address::p2wpkh(&pk.public_key(&secp), net).unwrap();
        println!("  p2wpkh:\t{}", address);
    }
}
