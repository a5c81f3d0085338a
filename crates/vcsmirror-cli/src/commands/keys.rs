//! `vcsmirror keys`.

use crate::context::Context;
use clap::Subcommand;
use vcsmirror_core::UserId;
use vcsmirror_store::UserRepo;
use vcsmirror_vcs::TrustOutcome;

/// SSH identity subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum KeysCommand {
    /// Generate the user's deploy keypair if missing and print the public key
    Create {
        /// User id
        user: UserId,
    },

    /// Add a host's keys to the user's known-hosts file
    Trust {
        /// User id
        user: UserId,

        /// Host name
        host: String,

        /// SSH port
        #[arg(long, default_value_t = 22)]
        port: u16,
    },
}

pub fn run(ctx: &Context, command: &KeysCommand) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let identities = ctx.identities();

    match command {
        KeysCommand::Create { user } => {
            store.read(|c| UserRepo::new(c).require(*user))?;
            if identities.ensure_keypair(*user)? {
                tracing::info!(user_id = *user, "keypair generated");
            }
            store.write(|tx| UserRepo::new(tx).set_rsa_pair(*user, true))?;
            println!("{}", identities.public_key(*user)?);
        }
        KeysCommand::Trust { user, host, port } => {
            store.read(|c| UserRepo::new(c).require(*user))?;
            match identities.trust_host(*user, host, *port)? {
                TrustOutcome::AlreadyKnown => println!("{host} already known"),
                TrustOutcome::Added { fingerprints } => {
                    for fingerprint in fingerprints {
                        println!("{host} {fingerprint}");
                    }
                }
            }
        }
    }
    Ok(())
}
