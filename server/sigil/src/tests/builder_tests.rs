use std::io::Write;

use crate::builder::build;
use crate::error::Error;
use jobs::{JobType, Payload};

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn command_payload(payload: &Payload) -> &jobs::Command {
    match payload {
        Payload::Command(cmd) => cmd,
        other => panic!("expected command payload, got {other:?}"),
    }
}

#[test]
fn test_unknown_kind() {
    assert!(matches!(
        build("frobnicate", Vec::new()),
        Err(Error::UnknownKind(name)) if name == "frobnicate"
    ));
}

#[test]
fn test_control_sleep() {
    let built = build("sleep", args(&["30s"])).unwrap();
    assert_eq!(built.kind, JobType::Control);
    let cmd = command_payload(&built.payload);
    assert_eq!(cmd.name, "sleep");
    assert_eq!(cmd.args, vec!["30s"]);
}

#[test]
fn test_native_defaults() {
    // ls with no target lists the working directory.
    let built = build("ls", Vec::new()).unwrap();
    assert_eq!(built.kind, JobType::Native);
    assert_eq!(command_payload(&built.payload).args, vec!["./"]);

    // pwd carries the name only.
    let built = build("pwd", args(&["ignored"])).unwrap();
    let cmd = command_payload(&built.payload);
    assert_eq!(cmd.name, "pwd");
    assert!(cmd.args.is_empty());

    // rm only ever takes its first argument.
    let built = build("rm", args(&["/tmp/a", "/tmp/b"])).unwrap();
    assert_eq!(command_payload(&built.payload).args, vec!["/tmp/a"]);
    assert!(matches!(
        build("rm", Vec::new()),
        Err(Error::Arguments { .. })
    ));
}

#[test]
fn test_cmd_run_and_shell() {
    let built = build("run", args(&["ping", "-c", "3", "8.8.8.8"])).unwrap();
    assert_eq!(built.kind, JobType::Cmd);
    let cmd = command_payload(&built.payload);
    assert_eq!(cmd.name, "ping");
    assert_eq!(cmd.args, vec!["-c", "3", "8.8.8.8"]);

    assert!(matches!(build("run", Vec::new()), Err(Error::Arguments { .. })));
    assert!(matches!(build("exec", Vec::new()), Err(Error::Arguments { .. })));

    let built = build("shell", args(&["whoami"])).unwrap();
    let cmd = command_payload(&built.payload);
    assert_eq!(cmd.name, "shell");
    assert_eq!(cmd.args, vec!["whoami"]);
}

#[test]
fn test_module_clr_wrapping() {
    let built = build("invoke-assembly", args(&["seatbelt", "-group=all"])).unwrap();
    assert_eq!(built.kind, JobType::Module);
    let cmd = command_payload(&built.payload);
    assert_eq!(cmd.name, "clr");
    assert_eq!(cmd.args, vec!["invoke-assembly", "seatbelt", "-group=all"]);

    let built = build("list-assemblies", Vec::new()).unwrap();
    let cmd = command_payload(&built.payload);
    assert_eq!(cmd.name, "clr");
    assert_eq!(cmd.args, vec!["list-assemblies"]);

    assert!(matches!(
        build("invoke-assembly", Vec::new()),
        Err(Error::Arguments { .. })
    ));
    assert!(matches!(
        build("load-clr", Vec::new()),
        Err(Error::Arguments { .. })
    ));
}

#[test]
fn test_download() {
    let built = build("download", args(&["/etc/passwd"])).unwrap();
    assert_eq!(built.kind, JobType::FileTransfer);
    match &built.payload {
        Payload::FileTransfer(ft) => {
            assert_eq!(ft.location, "/etc/passwd");
            assert!(ft.blob.is_empty());
            assert!(!ft.is_download);
        }
        other => panic!("expected file transfer, got {other:?}"),
    }

    assert!(matches!(
        build("download", Vec::new()),
        Err(Error::Arguments { .. })
    ));
}

#[test]
fn test_upload_embeds_hash_and_size() -> anyhow::Result<()> {
    let mut src = tempfile::NamedTempFile::new()?;
    src.write_all(b"hello")?;
    let src_path = src.path().to_str().unwrap().to_string();

    let built = build("upload", args(&[&src_path, "/c/x"])).unwrap();
    assert_eq!(built.kind, JobType::FileTransfer);
    match &built.payload {
        Payload::FileTransfer(ft) => {
            assert_eq!(ft.location, "/c/x");
            assert_eq!(ft.blob, "aGVsbG8=");
            assert!(ft.is_download);
        }
        other => panic!("expected file transfer, got {other:?}"),
    }
    assert_eq!(
        built.args[2],
        "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
    );
    assert_eq!(built.args[3], "5");

    assert!(matches!(
        build("upload", args(&["only-one"])),
        Err(Error::Arguments { .. })
    ));
    assert!(matches!(
        build("upload", args(&["/does/not/exist", "/c/x"])),
        Err(Error::Io(_))
    ));
    Ok(())
}

#[test]
fn test_upload_build_is_idempotent() -> anyhow::Result<()> {
    let mut src = tempfile::NamedTempFile::new()?;
    src.write_all(b"same bytes every time")?;
    let src_path = src.path().to_str().unwrap().to_string();

    let first = build("upload", args(&[&src_path, "/c/x"])).unwrap();
    let second = build("upload", args(&[&src_path, "/c/x"])).unwrap();
    assert_eq!(first.payload, second.payload);
    assert_eq!(first.args, second.args);
    Ok(())
}

#[test]
fn test_load_assembly() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("seatbelt.exe");
    std::fs::write(&path, b"MZ fake assembly")?;
    let path_str = path.to_str().unwrap().to_string();

    let built = build("load-assembly", args(&[&path_str])).unwrap();
    assert_eq!(built.kind, JobType::Module);
    let cmd = command_payload(&built.payload);
    assert_eq!(cmd.name, "clr");
    assert_eq!(cmd.args[0], "load-assembly");
    assert_eq!(cmd.args[2], "seatbelt.exe");
    // Hash is appended for the audit log, in hex.
    let hash = built.args.last().unwrap();
    assert_eq!(hash.len(), 64);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));

    // Operator-supplied name wins over the file name.
    let built = build("load-assembly", args(&[&path_str, "sb"])).unwrap();
    assert_eq!(command_payload(&built.payload).args[2], "sb");

    assert!(matches!(
        build("load-assembly", args(&["/does/not/exist"])),
        Err(Error::Io(_))
    ));
    Ok(())
}

#[test]
fn test_memfd() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tool");
    std::fs::write(&path, b"\x7fELF fake")?;
    let path_str = path.to_str().unwrap().to_string();

    let built = build("memfd", args(&[&path_str, "--flag"])).unwrap();
    assert_eq!(built.kind, JobType::Module);
    let cmd = command_payload(&built.payload);
    assert_eq!(cmd.name, "memfd");
    assert_eq!(cmd.args.len(), 2);
    assert_eq!(cmd.args[1], "--flag");
    // First payload argument is the encoded executable.
    assert!(!cmd.args[0].is_empty());

    assert!(matches!(build("memfd", Vec::new()), Err(Error::Arguments { .. })));
    Ok(())
}

#[test]
fn test_shellcode_methods() {
    let built = build("shellcode", args(&["self", "kDNuZg=="])).unwrap();
    assert_eq!(built.kind, JobType::Shellcode);
    match &built.payload {
        Payload::Shellcode(sc) => {
            assert_eq!(sc.method, "self");
            assert_eq!(sc.pid, 0);
            assert_eq!(sc.bytes, "kDNuZg==");
        }
        other => panic!("expected shellcode, got {other:?}"),
    }

    let built = build("shellcode", args(&["RtlCreateUserThread", "4312", "kDNuZg=="])).unwrap();
    match &built.payload {
        Payload::Shellcode(sc) => {
            assert_eq!(sc.method, "rtlcreateuserthread");
            assert_eq!(sc.pid, 4312);
        }
        other => panic!("expected shellcode, got {other:?}"),
    }

    assert!(matches!(
        build("shellcode", args(&["remote", "not-a-pid", "kDNuZg=="])),
        Err(Error::Arguments { .. })
    ));
    assert!(matches!(
        build("shellcode", args(&["remote", "4312"])),
        Err(Error::Arguments { .. })
    ));
    assert!(matches!(
        build("shellcode", args(&["teleport", "4312", "kDNuZg=="])),
        Err(Error::Arguments { .. })
    ));
    assert!(matches!(
        build("shellcode", Vec::new()),
        Err(Error::Arguments { .. })
    ));
}
