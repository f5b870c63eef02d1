//! End-to-end tests driving the interpreter façade over script sources.

use std::io::Read;
use std::path::PathBuf;

use pretty_assertions::assert_eq;

use crate::error::ErrorKind;
use crate::interpreter::Interpreter;
use crate::openfiles::OpenFile;
use crate::values::Value;

fn run(source: &str) -> Interpreter {
    let mut interpreter = Interpreter::new(true, &[]);
    interpreter.exec_source(source).expect("script failed");
    interpreter
}

fn run_err(source: &str) -> crate::error::Error {
    let mut interpreter = Interpreter::new(true, &[]);
    interpreter.exec_source(source).expect_err("script succeeded")
}

fn value_of(interpreter: &Interpreter, name: &str) -> String {
    interpreter
        .lookup_symbol(name)
        .unwrap_or_else(|| panic!("symbol '{name}' not found"))
        .format()
}

/// Runs a script with stdout redirected into a temp file; returns the
/// captured text.
fn run_capture(source: &str) -> (Interpreter, String) {
    let path = capture_path();
    let file = std::fs::OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(true)
        .open(&path)
        .unwrap();

    let mut interpreter = Interpreter::new(true, &[]);
    interpreter
        .interp_mut()
        .open_files
        .set(1, OpenFile::File(file));
    interpreter.exec_source(source).expect("script failed");

    let mut captured = String::new();
    std::fs::File::open(&path)
        .unwrap()
        .read_to_string(&mut captured)
        .unwrap();
    std::fs::remove_file(&path).ok();

    (interpreter, captured)
}

fn capture_path() -> PathBuf {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("shale-test-{}-{n}.out", std::process::id()))
}

#[test]
fn print_hello() {
    let (_, out) = run_capture("print(\"hello\")");
    assert_eq!(out, "hello\n");
}

#[test]
fn print_with_end_kwarg() {
    let (_, out) = run_capture("print(\"a\", end = \"\")\nprint(\"b\")");
    assert_eq!(out, "ab\n");
}

#[test]
fn for_over_range_prints_each_value() {
    let (_, out) = run_capture("for i in range(3) { print(i) }");
    assert_eq!(out, "0\n1\n2\n");
}

#[test]
fn recursive_fibonacci() {
    let interpreter = run(
        "func f(n) { if n < 2 { return n } return f(n-1) + f(n-2) }\nresult = f(10)",
    );
    assert_eq!(value_of(&interpreter, "result"), "55");
}

#[test]
fn throw_string_caught_by_string_type() {
    let (_, out) = run_capture("try { throw \"oops\" } catch string as e { print(e) }");
    assert_eq!(out, "oops\n");
}

#[test]
fn pipeline_exit_code_is_rightmost() {
    let interpreter = run("sh -c \"exit 3\" | sh -c \"exit 0\"\ncode = last_foreground_exit_code()");
    assert_eq!(value_of(&interpreter, "code"), "0");

    let interpreter = run("sh -c \"exit 0\" | sh -c \"exit 7\"\ncode = last_foreground_exit_code()");
    assert_eq!(value_of(&interpreter, "code"), "7");
}

#[test]
fn pipeline_through_tr() {
    let interpreter = run(
        "x = $(echo foo | tr f b)\ncode = last_foreground_exit_code()",
    );
    assert_eq!(value_of(&interpreter, "x"), "boo");
    assert_eq!(value_of(&interpreter, "code"), "0");
}

#[test]
fn and_or_short_circuits_on_exit_code() {
    let interpreter = run("sh -c \"exit 1\" || sh -c \"exit 0\"\ncode = last_foreground_exit_code()");
    assert_eq!(value_of(&interpreter, "code"), "0");

    let interpreter = run("sh -c \"exit 1\" && sh -c \"exit 0\"\ncode = last_foreground_exit_code()");
    assert_eq!(value_of(&interpreter, "code"), "1");
}

#[test]
fn command_substitution_in_expression() {
    let interpreter = run("x = $(echo hello)\ny = x.out\ns = x.status");
    assert_eq!(value_of(&interpreter, "y"), "hello");
    assert_eq!(value_of(&interpreter, "s"), "0");
}

#[test]
fn variable_interpolation_in_command_words() {
    let interpreter = run("name = \"world\"\nx = $(echo $name)");
    assert_eq!(value_of(&interpreter, "x"), "world");
}

#[test]
fn expression_interpolation_in_command_words() {
    let interpreter = run("n = 4\nx = $(echo ${n + 1})");
    assert_eq!(value_of(&interpreter, "x"), "5");
}

#[test]
fn defer_runs_in_lifo_order() {
    let (_, out) = run_capture(
        "func f() {\n  defer print(\"first\")\n  defer print(\"second\")\n  print(\"body\")\n}\nf()",
    );
    assert_eq!(out, "body\nsecond\nfirst\n");
}

#[test]
fn defer_runs_on_exceptional_exit() {
    let (_, out) = run_capture(
        "func f() {\n  defer print(\"cleanup\")\n  throw \"bad\"\n}\ntry { f() } catch string { print(\"caught\") }",
    );
    assert_eq!(out, "cleanup\ncaught\n");
}

#[test]
fn while_loop_with_break_and_continue() {
    let interpreter = run(
        "total = 0\ni = 0\nwhile true {\n  i = i + 1\n  if i > 10 { break }\n  if i % 2 == 0 { continue }\n  total = total + i\n}",
    );
    assert_eq!(value_of(&interpreter, "total"), "25");
}

#[test]
fn switch_matches_cases_and_default() {
    let (_, out) = run_capture(
        "switch 2 {\n  case 1 { print(\"one\") }\n  case 2, 3 { print(\"few\") }\n  default { print(\"many\") }\n}",
    );
    assert_eq!(out, "few\n");

    let (_, out) = run_capture(
        "switch 9 {\n  case 1 { print(\"one\") }\n  default { print(\"many\") }\n}",
    );
    assert_eq!(out, "many\n");
}

#[test]
fn classes_methods_and_inheritance() {
    let interpreter = run(
        "class Animal {\n  name = \"?\"\n  func __init__(name) { this.name = name }\n  func greet() { return \"hi \" + this.name }\n}\nclass Dog(Animal) {\n  func speak() { return this.greet() + \" woof\" }\n}\nd = Dog(\"rex\")\nx = d.speak()",
    );
    assert_eq!(value_of(&interpreter, "x"), "hi rex woof");
}

#[test]
fn static_methods_are_callable_on_the_type() {
    let interpreter = run(
        "class Counter {\n  static func make() { return 42 }\n}\nx = Counter.make()",
    );
    assert_eq!(value_of(&interpreter, "x"), "42");
}

#[test]
fn missing_interface_method_fails_at_declaration() {
    let err = run_err(
        "interface IShow {\n  func show()\n}\nclass C(IShow) {\n}",
    );
    assert_eq!(err.kind, ErrorKind::IncompatibleType);
}

#[test]
fn interface_satisfied_class_declares() {
    let interpreter = run(
        "interface IShow {\n  func show()\n}\nclass C(IShow) {\n  func show() { return 1 }\n}\nx = C().show()",
    );
    assert_eq!(value_of(&interpreter, "x"), "1");
}

#[test]
fn catch_matches_by_instance_of() {
    let (_, out) = run_capture(
        "class AppError {\n  msg = \"\"\n  func __init__(m) { this.msg = m }\n}\nclass DbError(AppError) { }\ntry {\n  throw DbError(\"down\")\n} catch AppError as e {\n  print(e.msg)\n}",
    );
    assert_eq!(out, "down\n");
}

#[test]
fn uncaught_rethrows_after_finally() {
    let (interpreter, out) = run_capture(
        "hit = false\ntry {\n  try { throw \"x\" } catch int { print(\"wrong\") } finally { print(\"fin\") }\n} catch string {\n  hit = true\n}",
    );
    assert_eq!(out, "fin\n");
    assert_eq!(value_of(&interpreter, "hit"), "true");
}

#[test]
fn division_by_zero_is_catchable_as_invalid_args() {
    let (_, out) = run_capture(
        "try { x = 1 / 0 } catch InvalidArgs { print(\"caught\") }",
    );
    assert_eq!(out, "caught\n");
}

#[test]
fn internal_error_instance_carries_message() {
    let interpreter = run(
        "msg = \"\"\ntry { x = nil + 1 } catch IncompatibleType as e { msg = e.msg }",
    );
    assert!(value_of(&interpreter, "msg").contains("add"));
}

#[test]
fn multi_assignment_and_tuple_spread() {
    let interpreter = run("a, b = 1, 2\nfunc f() { return 3, 4 }\nc, d = f()");
    assert_eq!(value_of(&interpreter, "a"), "1");
    assert_eq!(value_of(&interpreter, "b"), "2");
    assert_eq!(value_of(&interpreter, "c"), "3");
    assert_eq!(value_of(&interpreter, "d"), "4");
}

#[test]
fn parallel_for_in_iteration() {
    let interpreter = run(
        "pairs = []\nfor x, y in [1, 2, 3], [\"a\", \"b\", \"c\"] {\n  pairs.append(string(x) + y)\n}",
    );
    assert_eq!(value_of(&interpreter, "pairs"), "[\"1a\", \"2b\", \"3c\"]");
}

#[test]
fn function_scope_is_opaque_to_assignment() {
    let interpreter = run("x = 1\nfunc f() { x = 99\n return x }\ny = f()");
    assert_eq!(value_of(&interpreter, "x"), "1");
    assert_eq!(value_of(&interpreter, "y"), "99");
}

#[test]
fn del_removes_bindings_and_elements() {
    let mut interpreter = Interpreter::new(true, &[]);
    interpreter.exec_source("x = 1\ndel x").unwrap();
    assert!(interpreter.lookup_symbol("x").is_none());

    interpreter
        .exec_source("a = [1, 2, 3]\ndel a[1]")
        .unwrap();
    assert_eq!(value_of(&interpreter, "a"), "[1, 3]");
}

#[test]
fn undefined_symbol_raises_id_not_found() {
    let err = run_err("x = definitely_missing");
    assert_eq!(err.kind, ErrorKind::IdNotFound);
    assert!(err.pos.is_some());
}

#[test]
fn command_not_found_is_an_error() {
    let err = run_err("definitely-not-a-command-zzz");
    assert_eq!(err.kind, ErrorKind::IdNotFound);
}

#[test]
fn varenv_exports_to_process_environment() {
    run("varenv SHALE_TEST_VAR = \"shale-value\"");
    assert_eq!(
        std::env::var("SHALE_TEST_VAR").as_deref(),
        Ok("shale-value")
    );
    std::env::remove_var("SHALE_TEST_VAR");
}

#[test]
fn aliases_expand_one_level() {
    let interpreter = run("alias say = echo prefixed\nx = $(say tail)");
    assert_eq!(value_of(&interpreter, "x"), "prefixed tail");
}

#[test]
fn scripted_cmd_declarations_run_in_process() {
    let (_, out) = run_capture("cmd greet {\n  print(\"hello from cmd\")\n}\ngreet");
    assert_eq!(out, "hello from cmd\n");
}

#[test]
fn scripted_cmd_receives_args() {
    let (_, out) = run_capture("cmd show {\n  for a in args { print(a) }\n}\nshow one two");
    assert_eq!(out, "one\ntwo\n");
}

#[test]
fn output_redirection_to_file() {
    let target = capture_path();
    let script = format!("echo redirected > {}", target.display());
    run(&script);

    let contents = std::fs::read_to_string(&target).unwrap();
    assert_eq!(contents, "redirected\n");
    std::fs::remove_file(&target).ok();
}

#[test]
fn here_string_feeds_stdin() {
    let interpreter = run("x = $(cat <<< hello)");
    assert_eq!(value_of(&interpreter, "x"), "hello");
}

#[test]
fn background_jobs_record_their_pid() {
    let interpreter = run("sleep 0.05 &\npid = last_background_pid()");
    let pid = value_of(&interpreter, "pid");
    assert!(pid.parse::<i32>().unwrap() > 0);
}

#[test]
fn empty_glob_keeps_the_literal_word() {
    let interpreter = run("x = $(echo /definitely/missing/dir/*.zzz)");
    assert_eq!(value_of(&interpreter, "x"), "/definitely/missing/dir/*.zzz");
}

#[test]
fn repeated_runs_are_deterministic() {
    let script = "total = 0\nfor i in range(5) { total = total + i }";
    let first = run(script);
    let second = run(script);
    assert_eq!(value_of(&first, "total"), value_of(&second, "total"));
}

#[test]
fn global_assignment_restricted_to_main_scope() {
    let err = run_err("func f() { global x = 1 }\nf()");
    assert_eq!(err.kind, ErrorKind::SymbolDef);
}

#[test]
fn eval_runs_in_the_calling_scope() {
    let interpreter = run("x = 1\neval(\"x = x + 41\")");
    assert_eq!(value_of(&interpreter, "x"), "42");
}

#[test]
fn anonymous_functions_capture_their_scope() {
    let interpreter = run(
        "base = 10\nadd = func (n) { return base + n }\nx = add(5)",
    );
    assert_eq!(value_of(&interpreter, "x"), "15");
}

#[test]
fn conditional_expression() {
    let interpreter = run("x = 1 < 2 ? \"yes\" : \"no\"");
    assert_eq!(value_of(&interpreter, "x"), "yes");
}

#[test]
fn int_string_round_trip() {
    let interpreter = run("n = -37\nx = int(string(n))");
    assert_eq!(value_of(&interpreter, "x"), "-37");
}

#[test]
fn copy_produces_equal_but_distinct_container() {
    let interpreter = run(
        "a = [1, 2]\nb = copy(a)\nsame_value = a == b\nsame_id = id(a) == id(b)",
    );
    assert_eq!(value_of(&interpreter, "same_value"), "true");
    assert_eq!(value_of(&interpreter, "same_id"), "false");
}

#[test]
fn interactive_loop_concatenates_incomplete_statements() {
    let mut interpreter = Interpreter::new(true, &[]);

    let lines = vec!["if true {", "x = 1", "}"];
    let mut line_iter = lines.into_iter();
    let mut prompts = vec![];

    interpreter.exec_interactive(
        |interp, continuation| {
            prompts.push(interp.prompt(continuation));
            match line_iter.next() {
                Some(line) => crate::ReadOutcome::Line(line.to_string()),
                None => crate::ReadOutcome::Eof,
            }
        },
        |err| panic!("unexpected error: {err}"),
    );

    assert_eq!(value_of(&interpreter, "x"), "1");
    assert_eq!(prompts, vec!["> ", "| ", "| ", "> "]);
}

#[test]
fn interactive_empty_line_yields_fresh_prompt() {
    let mut interpreter = Interpreter::new(true, &[]);

    let lines = vec![""];
    let mut line_iter = lines.into_iter();
    let mut errors = 0;

    interpreter.exec_interactive(
        |_, _| match line_iter.next() {
            Some(line) => crate::ReadOutcome::Line(line.to_string()),
            None => crate::ReadOutcome::Eof,
        },
        |_| errors += 1,
    );

    assert_eq!(errors, 0);
}

#[test]
fn user_defined_ps1_controls_the_prompt() {
    let mut interpreter = Interpreter::new(true, &[]);
    interpreter
        .exec_source("func PS1() { return \"shale$ \" }")
        .unwrap();
    assert_eq!(interpreter.prompt(false), "shale$ ");
    assert_eq!(interpreter.prompt(true), "| ");
}

#[test]
fn import_loads_a_module_once() {
    let dir = std::env::temp_dir().join(format!("shale-mod-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let module_path = dir.join("helper.sl");
    std::fs::write(&module_path, "answer = 42\nfunc double(n) { return n * 2 }\n").unwrap();

    let script_path = dir.join("main.sl");
    std::fs::write(
        &script_path,
        "import \"helper.sl\" as helper\nimport \"helper.sl\" as again\nx = helper.answer\ny = helper.double(21)\n",
    )
    .unwrap();

    let mut interpreter = Interpreter::new(true, &[]);
    interpreter.exec_file(&script_path, &[]).unwrap();
    assert_eq!(value_of(&interpreter, "x"), "42");
    assert_eq!(value_of(&interpreter, "y"), "42");

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn script_error_reports_carry_file_and_line() {
    let dir = std::env::temp_dir().join(format!("shale-err-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let script_path = dir.join("bad.sl");
    std::fs::write(&script_path, "x = 1\ny = missing_symbol\n").unwrap();

    let mut interpreter = Interpreter::new(true, &[]);
    let err = interpreter.exec_file(&script_path, &[]).unwrap_err();

    assert_eq!(err.pos.map(|p| p.line), Some(2));
    assert!(err.message.contains("bad.sl"));

    let rendered = crate::render_file_error(&err, &script_path);
    assert!(rendered.contains("line: 2"));

    std::fs::remove_dir_all(&dir).ok();
}
