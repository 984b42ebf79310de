use std::fmt::Write;

use anyhow::Result;
use crossterm::style::Stylize;
use pinion_core::{InitOptions, Requirements};

/// `pinion providers`
pub fn providers(opts: &InitOptions) -> Result<()> {
    let reqs = pinion_core::init::load_requirements(opts)?;
    print!("{}", render_tree(&reqs)?);
    Ok(())
}

/// The requirement tree: each provider, then each module's constraint.
pub fn render_tree(reqs: &Requirements) -> Result<String, std::fmt::Error> {
    let mut out = String::new();
    if reqs.is_empty() {
        out.push_str("The configuration does not require any providers.\n");
        return Ok(out);
    }

    out.push_str("Providers required by configuration:\n");
    for (provider, constraints) in reqs {
        writeln!(out, "* {}", provider.for_display().bold())?;
        if constraints.entries().is_empty() {
            writeln!(out, "    - {}", "required by existing state".dark_grey())?;
        }
        for entry in constraints.entries() {
            let module = if entry.module.is_empty() {
                "root"
            } else {
                entry.module.as_str()
            };
            let constraint = if entry.constraints.is_unconstrained() {
                "any version".to_string()
            } else {
                entry.constraints.to_string()
            };
            writeln!(out, "    - {module}: {constraint}")?;
        }
    }
    Ok(out)
}
