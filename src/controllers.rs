//! One module per kind template, generated by the build script.
//!
//! Each module exposes `REF`, `SPEC`, `controller()` and the `present`, `absent` and
//! `describe` entry points for its kind.

use futures::future::try_join_all;

use crate::{context::Context, engine::Described, Result};

include!(concat!(env!("OUT_DIR"), "/controllers.rs"));

/// Describe every generated kind, merging the fragments of same-named instances
pub async fn describe_all(ctx: &Context) -> Result<Described> {
    let controllers = registry();
    let described = try_join_all(controllers.iter().map(|controller| controller.describe(ctx))).await?;

    let mut merged = Described::new();
    for (name, states) in described.into_iter().flatten() {
        merged.entry(name).or_default().extend(states);
    }
    Ok(merged)
}
