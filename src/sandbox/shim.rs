// src/sandbox/shim.rs

//! Runner scripts for student code.
//!
//! The Rust side does NOT interpret JavaScript or Python itself. It spawns
//! Node or Python on a small runner script that executes the student
//! program in the same process. Nothing the runner writes is trusted:
//! - STDOUT is the student's printed output and nothing else. When the
//!   program printed nothing, the runner prints its completion value as
//!   one more line.
//! - STDERR ends with a one-line description of the failure, if any.
//! - the exit status classifies the outcome: `0` clean, [`SYNTAX_EXIT`],
//!   [`TIMEOUT_EXIT`], anything else a runtime failure.
//!
//! Student code can forge any of these, but only against itself: the
//! grader reads them exactly as it would read an honest program.

/// Exit status for code that does not parse.
pub const SYNTAX_EXIT: i32 = 3;

/// Exit status for code stopped by the interpreter's own time budget.
pub const TIMEOUT_EXIT: i32 = 4;

/// File name of the Node runner inside the run directory.
pub const NODE_RUNNER: &str = "grade_runner.cjs";

/// File names of the Python runner and the student source.
pub const PYTHON_RUNNER: &str = "grade_runner.py";
pub const PYTHON_SOURCE: &str = "student.py";

const NODE_TEMPLATE: &str = r##""use strict";
// grade_runner.cjs
const vm = require("node:vm");

const TIMEOUT_MS = __TIMEOUT_MS__;
const SYNTAX_EXIT = __SYNTAX_EXIT__;
const TIMEOUT_EXIT = __TIMEOUT_EXIT__;
const SOURCE = __STUDENT_SOURCE__;

const proc = process;
const stdoutWrite = proc.stdout.write.bind(proc.stdout);
let printed = false;
proc.stdout.write = (...args) => {
  printed = true;
  return stdoutWrite(...args);
};

function show(v) {
  if (typeof v === "string") return v;
  if (typeof v === "function") return "[function]";
  try {
    const json = JSON.stringify(v);
    return json === undefined ? String(v) : json;
  } catch {
    return String(v);
  }
}

function describe(e) {
  if (e && typeof e === "object" && "message" in e) {
    return (e.name ? e.name + ": " : "") + e.message;
  }
  return String(e);
}

function fail(code, message) {
  proc.stderr.write(String(message).replace(/\s*\n\s*/g, " ") + "\n");
  proc.exitCode = code;
}

proc.on("uncaughtException", (e) => {
  fail(1, describe(e));
  proc.exit(1);
});

const print = (...args) => console.log(...args);
globalThis.print = print;
globalThis.alert = print;
globalThis.window = globalThis;

let script;
try {
  script = new vm.Script(SOURCE, { filename: "student.js" });
} catch (e) {
  fail(SYNTAX_EXIT, describe(e));
  return;
}

try {
  const result = script.runInThisContext({ timeout: TIMEOUT_MS, breakOnSigint: true });
  if (!printed && result !== undefined) {
    console.log(show(result));
  }
} catch (e) {
  if (e && e.code === "ERR_SCRIPT_EXECUTION_TIMEOUT") {
    fail(TIMEOUT_EXIT, "Script execution timed out after " + TIMEOUT_MS + "ms");
  } else {
    fail(1, describe(e));
  }
}
"##;

/// Node.js runner (CommonJS) with the student source embedded.
///
/// Usage (internal):
/// node [--permission --allow-fs-read=<runner>] grade_runner.cjs
///
/// The source is embedded as a JSON string literal so the process needs
/// read access to exactly one file. `print`, `alert` and `window` are
/// provided as globals next to `console`.
pub fn node_runner(source: &str, timeout_ms: u64) -> String {
    let literal = serde_json::Value::String(source.to_string()).to_string();

    // Source goes in last so text inside it is never treated as a placeholder.
    NODE_TEMPLATE
        .replace("__TIMEOUT_MS__", &timeout_ms.to_string())
        .replace("__SYNTAX_EXIT__", &SYNTAX_EXIT.to_string())
        .replace("__TIMEOUT_EXIT__", &TIMEOUT_EXIT.to_string())
        .replace("__STUDENT_SOURCE__", &literal)
}

const PYTHON_TEMPLATE: &str = r##"# grade_runner.py
import os
import sys

SYNTAX_EXIT = __SYNTAX_EXIT__

DENIED_EVENTS = (
    "subprocess.", "os.system", "os.exec", "os.posix_spawn", "os.spawn",
    "os.fork", "os.forkpty", "os.kill", "os.killpg", "pty.", "socket.",
    "ctypes.", "os.remove", "os.rename", "os.rmdir", "os.mkdir",
    "os.truncate", "os.chmod", "os.chown", "os.symlink", "os.link",
    "os.putenv", "os.unsetenv", "os.chdir", "shutil.", "urllib.",
    "sys.setprofile", "sys.settrace", "sys.addaudithook",
)

WRITE_FLAGS = os.O_WRONLY | os.O_RDWR | os.O_CREAT | os.O_APPEND | os.O_TRUNC


def fail(code, message):
    sys.stderr.write(" ".join(str(message).split()) + "\n")
    sys.stderr.flush()
    sys.exit(code)


def describe(e):
    text = str(e)
    return type(e).__name__ + (": " + text if text else "")


class TrackedOutput:
    def __init__(self, inner):
        self._inner = inner
        self.used = False

    def write(self, text):
        if text:
            self.used = True
        return self._inner.write(text)

    def flush(self):
        return self._inner.flush()

    def __getattr__(self, name):
        return getattr(self._inner, name)


def readable_roots():
    prefixes = {sys.prefix, sys.base_prefix, sys.exec_prefix, sys.base_exec_prefix}
    return tuple(os.path.join(os.path.realpath(p), "") for p in prefixes if p)


def make_guard(roots):
    def guard(event, args):
        if event.startswith(DENIED_EVENTS):
            raise PermissionError(event + " is not allowed")
        if event == "object.__setattr__" and len(args) > 1 and args[1] == "__code__":
            raise PermissionError("replacing function code is not allowed")
        if event != "open":
            return
        path, mode, flags = args
        if isinstance(path, int):
            return
        writing = isinstance(flags, int) and bool(flags & WRITE_FLAGS)
        if isinstance(mode, str) and any(c in mode for c in "wax+"):
            writing = True
        name = os.fsdecode(path)
        if writing or not os.path.realpath(name).startswith(roots):
            raise PermissionError("access to " + name + " is not allowed")

    return guard


def main():
    with open(sys.argv[1], "r", encoding="utf-8") as f:
        source = f.read()

    try:
        program = compile(source, "student.py", "exec")
    except SyntaxError as e:
        fail(SYNTAX_EXIT, "SyntaxError: " + str(e.msg) + " (line " + str(e.lineno) + ")")

    try:
        expression = compile(source, "student.py", "eval")
    except SyntaxError:
        expression = None

    out = TrackedOutput(sys.stdout)
    sys.stdout = out
    sys.addaudithook(make_guard(readable_roots()))

    scope = {"__name__": "__main__"}
    try:
        if expression is None:
            exec(program, scope)
        else:
            value = eval(expression, scope)
            if value is not None and not out.used:
                print(value)
    except Exception as e:
        fail(1, describe(e))

    out.flush()


main()
"##;

/// Python runner.
///
/// Usage (internal):
/// python3 -I -S -B grade_runner.py student.py
///
/// The program runs with the real builtins; an audit hook refuses file
/// access outside the interpreter's own library, writes, process spawning
/// and sockets. An expression-only program is evaluated once and its
/// value printed when nothing else was.
pub fn python_runner() -> String {
    PYTHON_TEMPLATE.replace("__SYNTAX_EXIT__", &SYNTAX_EXIT.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_runner_embeds_source_as_literal() {
        let runner = node_runner("console.log(\"__TIMEOUT_MS__\");\n", 750);

        assert!(runner.contains("const TIMEOUT_MS = 750;"));
        assert!(runner.contains(r#"const SOURCE = "console.log(\"__TIMEOUT_MS__\");\n";"#));
        assert!(!runner.contains("__STUDENT_SOURCE__"));
    }

    #[test]
    fn test_runners_never_read_a_report_from_student_output() {
        let node = node_runner("", 1);
        assert!(!node.contains("JSON.stringify({"));
        assert!(!python_runner().contains("json"));
        assert!(python_runner().contains(&format!("SYNTAX_EXIT = {SYNTAX_EXIT}")));
    }

    #[test]
    fn test_python_runner_guards_files_and_processes() {
        let runner = python_runner();
        assert!(runner.contains("sys.addaudithook"));
        assert!(runner.contains("\"subprocess.\""));
        assert!(runner.contains("\"socket.\""));
    }
}
