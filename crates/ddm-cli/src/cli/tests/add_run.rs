//! Tests for add and run subcommands.

use super::parse;
use crate::cli::CliCommand;

#[test]
fn cli_parse_add() {
    match parse(&["ddm", "add", "https://example.com/file.iso"]) {
        CliCommand::Add {
            url,
            owner,
            no_integrity,
        } => {
            assert_eq!(url, "https://example.com/file.iso");
            assert!(owner.is_none());
            assert!(!no_integrity);
        }
        _ => panic!("expected Add"),
    }
}

#[test]
fn cli_parse_add_owner_and_no_integrity() {
    match parse(&[
        "ddm",
        "add",
        "https://example.com/x",
        "--owner",
        "app1",
        "--no-integrity",
    ]) {
        CliCommand::Add {
            url,
            owner,
            no_integrity,
        } => {
            assert_eq!(url, "https://example.com/x");
            assert_eq!(owner.as_deref(), Some("app1"));
            assert!(no_integrity);
        }
        _ => panic!("expected Add with --owner and --no-integrity"),
    }
}

#[test]
fn cli_parse_run() {
    match parse(&["ddm", "run"]) {
        CliCommand::Run { daemon } => assert!(!daemon),
        _ => panic!("expected Run"),
    }
}

#[test]
fn cli_parse_run_daemon() {
    match parse(&["ddm", "run", "--daemon"]) {
        CliCommand::Run { daemon } => assert!(daemon),
        _ => panic!("expected Run with --daemon"),
    }
}
