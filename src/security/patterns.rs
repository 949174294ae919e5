//! Dangerous-pattern tables. Kept as plain data so the rule set can be
//! read and updated without touching the validator's control flow.

/// Exactly the images a container may be created from.
pub static IMAGE_ALLOW_LIST: &[&str] = &[
    "python:3.11-alpine",
    "python:3.10-alpine",
    "python:3.9-alpine",
    "alpine:latest",
    "alpine:3.18",
    "alpine:3.17",
    "node:18-alpine",
    "node:16-alpine",
    "golang:1.21-alpine",
    "golang:1.20-alpine",
];

/// Working directory must not fall under any of these prefixes.
pub static FORBIDDEN_WORKDIR_PREFIXES: &[&str] = &[
    "/etc", "/root", "/home", "/var/log", "/var/run", "/proc", "/sys", "/dev", "/bin", "/sbin",
    "/usr/bin", "/usr/sbin",
];

/// The only paths a tmpfs mount may target.
pub static ALLOWED_TMPFS_TARGETS: &[&str] = &["/tmp", "/var/tmp", "/workspace"];

/// Blocked regardless of script language.
pub static UNIVERSAL_BLOCKLIST: &[&str] = &[
    "rm -rf",
    "rm -r",
    "mkfs",
    "dd if=",
    "wget",
    "curl",
    "docker",
    "podman",
    "containerd",
    "runc",
    "xmrig",
    "minerd",
    "cpuminer",
    "setuid",
    "ptrace",
    "chroot",
];

/// Python modules whose import (in any form) is rejected.
pub static PYTHON_DANGEROUS_MODULES: &[&str] = &[
    "os", "subprocess", "sys", "shutil", "socket", "urllib", "requests", "ctypes", "pty",
    "multiprocessing", "importlib",
];

/// Modules a Python script may import freely.
pub static PYTHON_SAFE_MODULES: &[&str] = &[
    "math",
    "json",
    "datetime",
    "random",
    "time",
    "re",
    "collections",
    "itertools",
    "functools",
    "decimal",
    "fractions",
    "statistics",
    "string",
    "textwrap",
    "unicodedata",
    "base64",
    "binascii",
    "hashlib",
    "hmac",
    "uuid",
];

/// Python builtins/call forms blocked outright, independent of imports.
pub static PYTHON_BLOCKED_CALLS: &[&str] = &[
    "eval(",
    "exec(",
    "compile(",
    "globals()",
    "locals()",
    "__import__",
    "getattr(",
    "setattr(",
    "delattr(",
    "hasattr(",
    "input(",
];

/// Bash-specific dangerous substrings.
pub static BASH_BLOCKLIST: &[&str] = &[
    "/dev/tcp/",
    "/dev/udp/",
    "sudo ",
    "su ",
    "> /",
    ">> /",
    "apt-get",
    "apt ",
    "yum ",
    "apk add",
    "pip install",
    "npm install",
    "ssh ",
    "scp ",
    "nc ",
    "netcat",
    "telnet",
    "uname -a",
    "whoami",
    "/etc/passwd",
    "`",
];

/// JavaScript modules whose `require` is rejected.
pub static JAVASCRIPT_DANGEROUS_MODULES: &[&str] =
    &["fs", "child_process", "os", "process", "http", "https", "net", "dgram", "cluster", "vm"];

/// Modules a JavaScript script may `require` freely.
pub static JAVASCRIPT_SAFE_MODULES: &[&str] = &[
    "util", "path", "crypto", "events", "assert", "querystring", "url", "string_decoder",
];

/// JavaScript call/keyword forms blocked outright.
pub static JAVASCRIPT_BLOCKED_CALLS: &[&str] = &[
    "eval(",
    "new function(",
    "settimeout(",
    "setinterval(",
    "process.",
    "global.",
    "import ",
    "export ",
];

/// Go import paths / keywords blocked outright.
pub static GO_BLOCKLIST: &[&str] = &[
    "os/exec",
    "syscall",
    "\"net\"",
    "net.",
    "os.remove",
    "os.removeall",
    "unsafe",
    "plugin",
    "cgo",
    "import \"c\"",
];
