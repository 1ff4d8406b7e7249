//! # Compact collections over a shared superset
//!
//! Builds a handful of role permission sets and prints what got shared.

use std::sync::Arc;
use superset::prelude::*;

fn main() -> Result<(), Error> {
    env_logger::init();

    let permissions = Arc::new(Universe::new([
        "read", "write", "delete", "share", "admin",
    ]));
    let roles = [
        ("viewer", vec!["read"]),
        ("editor", vec!["read", "write"]),
        ("author", vec!["read", "write"]),
        ("owner", vec!["read", "write", "delete", "share", "admin"]),
    ];

    let subsets = SubsetDeduper::build_many(
        Arc::clone(&permissions),
        roles.iter().map(|(_, perms)| perms.iter().copied()),
    )?;
    for ((role, _), subset) in roles.iter().zip(&subsets) {
        println!("{role:>8}: {subset} ({})", subset.representation());
    }

    let factory = CompactMapFactory::new(permissions);
    let mut grants = factory.builder_with(|_: &&str| Some(Vec::new()));
    for (role, perms) in &roles {
        for perm in perms {
            if let Some(holders) = grants.get(perm)? {
                holders.push(*role);
            }
        }
    }
    let grants = grants.build()?;

    for (perm, holders) in grants.iter() {
        println!("{perm:>8}: {}", holders.join(", "));
    }
    println!("{}", factory.stats());
    Ok(())
}
