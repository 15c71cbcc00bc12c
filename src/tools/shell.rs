//! Shell command construction for the directory-change fallback.
//!
//! This is the only place in the crate where values are interpolated into a
//! string that a shell will parse. Every interpolated value (directory,
//! program, argument) goes through [`quote`].

use std::borrow::Cow;
use std::path::Path;

use shell_escape::unix::escape;

/// Interpreter used by the shell-mediated strategy
pub const SHELL_INTERPRETER: &str = "/bin/sh";

/// Prefix of the stderr line the launch guard writes before giving up
pub const LAUNCH_FAILURE_MARKER: &str = "toolgate: cannot launch";

/// Guard exit code for "command not found"
pub const EXIT_NOT_FOUND: i32 = 127;

/// Guard exit code for "found but not executable"
pub const EXIT_NOT_EXECUTABLE: i32 = 126;

/// Quote one value so the shell sees it as a single literal word.
///
/// Quotes, `$`, backticks, spaces and newlines all lose their meaning:
///
/// - `a b` -> `'a b'`
/// - `it's` -> `'it'\''s'`
/// - `$HOME` -> `'$HOME'`
pub fn quote(value: &str) -> String {
    escape(Cow::Borrowed(value)).into_owned()
}

/// Quote a path, see [`quote`]
pub fn quote_path(path: &Path) -> String {
    quote(&path.to_string_lossy())
}

fn give_up(program: &Path, reason: &str, code: i32) -> String {
    let message = format!("{} {}: {}", LAUNCH_FAILURE_MARKER, program.display(), reason);
    format!("printf '%s\\n' {} >&2; exit {}", quote(&message), code)
}

/// Shell test that exits with a marked status when `program` cannot be started.
///
/// The tool's own exit status replaces the shell's after `exec`, so 126 and
/// 127 only mean "never launched" when they come from this guard.
fn launch_guard(program: &Path) -> String {
    let quoted = quote_path(program);
    if program.to_string_lossy().contains('/') {
        format!(
            "if [ ! -e {q} ]; then {nf}; fi; if [ -d {q} ] || [ ! -x {q} ]; then {nx}; fi",
            q = quoted,
            nf = give_up(program, "not found", EXIT_NOT_FOUND),
            nx = give_up(program, "not executable", EXIT_NOT_EXECUTABLE),
        )
    } else {
        format!(
            "if ! command -v {} >/dev/null 2>&1; then {}; fi",
            quoted,
            give_up(program, "not found", EXIT_NOT_FOUND),
        )
    }
}

/// Build `cd -- <dir> || exit; <guard>; exec <program> <args...>` with every
/// part quoted.
///
/// `exec` replaces the shell, so one strategy attempt is one process.
pub fn cd_and_exec(dir: &Path, program: &Path, args: &[String]) -> String {
    let mut command = format!(
        "cd -- {} || exit; {}; exec {}",
        quote_path(dir),
        launch_guard(program),
        quote_path(program)
    );
    for arg in args {
        command.push(' ');
        command.push_str(&quote(arg));
    }
    command
}
