use crossterm::style::Stylize;
use pinion_core::{ErrorCategory, InitReport, InstallError, InstallWarning};

/// Print the end-of-run report: warnings and errors to stderr, notes to
/// stdout.
pub fn print_report(report: &InitReport) {
    for warning in &report.install.warnings {
        eprintln!("{}", format_warning(warning));
    }
    for error in report.install.failures() {
        // One cancellation notice stands in for every canceled provider.
        if report.install.canceled && error.category() == ErrorCategory::Cancellation {
            continue;
        }
        eprintln!("{}", format_error(error));
    }
    for note in report.notes() {
        println!("\n{note}");
    }
    if report.is_success() {
        println!(
            "\n{}",
            "pinion has been successfully initialized!".green().bold()
        );
    }
}

/// One error diagnostic: heading, detail, then the hint when there is one.
pub fn format_error(error: &InstallError) -> String {
    let mut out = format!(
        "\n{} {}\n\n{} [{}]",
        "Error:".red().bold(),
        error.summary().bold(),
        error,
        error.category()
    );
    if let Some(hint) = error.hint() {
        out.push_str("\n\n");
        out.push_str(&hint);
    }
    out
}

pub fn format_warning(warning: &InstallWarning) -> String {
    format!("\n{} {warning}", "Warning:".yellow().bold())
}

#[cfg(test)]
mod tests {
    use pinion_core::SourceError;
    use pinion_schema::ProviderIdentity;

    use super::*;

    #[test]
    fn error_includes_category_and_hint() {
        let error = InstallError::Query {
            provider: ProviderIdentity::parse("acme/widget").unwrap(),
            source: SourceError::ProviderNotFound {
                provider: ProviderIdentity::parse("acme/widget").unwrap(),
                searched: vec!["/mirror".into()],
            },
            suggestion: Some(ProviderIdentity::parse("acme/widgets").unwrap()),
        };
        let out = format_error(&error);
        assert!(out.contains("Failed to query available provider packages"));
        assert!(out.contains("[source]"));
        assert!(out.contains("  - /mirror"));
        assert!(out.contains("Did you intend to use acme/widgets?"));
    }
}
