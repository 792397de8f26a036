use colored::*;
use scanflow_core::model::rule::CascadingRule;
use std::path::Path;

pub fn print_scan_created(name: &str, namespace: &str) {
    println!(
        " {} created scan '{}' in namespace '{}'",
        "OK".green().bold(),
        name.cyan(),
        namespace
    );
}

pub fn print_ingested(created: &[String], namespace: &str) {
    println!(
        " {} event normalized into {} scan(s) in namespace '{}'",
        "OK".green().bold(),
        created.len(),
        namespace
    );
    for name in created {
        println!(" {} {}", "|-".dimmed(), name.cyan());
    }
}

pub fn print_rules_valid(rules: &[CascadingRule], file: &Path) {
    println!(
        " {} {} rule(s) in {} are valid",
        "OK".green().bold(),
        rules.len(),
        file.display()
    );
    for rule in rules {
        println!(
            " {} {} -> {} ({} condition(s))",
            "|-".dimmed(),
            rule.metadata.name.cyan(),
            rule.spec.scan_spec.scan_type,
            rule.spec.matches.any_of.len()
        );
    }
}
