//! `holodeck os` - inspect the image registry

use anyhow::{anyhow, Result};

use crate::provider::ami;

use super::OsCommands;

pub fn run(command: OsCommands) -> Result<()> {
    match command {
        OsCommands::List => {
            println!("{:<14} {:<40} {}", "ID", "NAME", "REGIONS");
            for entry in ami::list() {
                println!(
                    "{:<14} {:<40} {}",
                    entry.id,
                    entry.name,
                    entry.regions().join(",")
                );
            }
            Ok(())
        }
        OsCommands::Describe { id } => {
            let entry =
                ami::get(&id).ok_or_else(|| anyhow!("unknown OS id {id:?}; see `holodeck os list`"))?;
            println!("id:               {}", entry.id);
            println!("name:             {}", entry.name);
            println!("default username: {}", entry.default_username);
            println!("regions:          {}", entry.regions().join(", "));
            Ok(())
        }
        OsCommands::Ami { id, region, arch } => {
            let ami_id = ami::resolve(&id, &region, &arch)?;
            println!("{ami_id}");
            Ok(())
        }
    }
}
