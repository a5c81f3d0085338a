//! `vcsmirror user`.

use crate::context::Context;
use clap::Subcommand;
use vcsmirror_store::UserRepo;

/// User subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum UserCommand {
    /// Add a mirror owner
    Add {
        /// Display name
        name: String,

        /// User id in the hosting service
        #[arg(long, value_name = "ID")]
        hosted_id: Option<i64>,
    },

    /// List mirror owners
    List,
}

pub fn run(ctx: &Context, command: &UserCommand) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    match command {
        UserCommand::Add { name, hosted_id } => {
            let user = store.write(|tx| UserRepo::new(tx).insert(name, *hosted_id))?;
            println!("{}", user.id);
        }
        UserCommand::List => {
            for user in store.read(|c| UserRepo::new(c).list())? {
                let keys = if user.is_rsa_pair_set { "keys" } else { "no keys" };
                println!("{}\t{}\t{keys}", user.id, user.name);
            }
        }
    }
    Ok(())
}
