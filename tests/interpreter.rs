//! End-to-end sessions through the public `Interpreter`
#![expect(clippy::unwrap_used)] // test code OK

use mallet::Error;
use mallet::interpreter::Interpreter;
use pretty_assertions::assert_eq;

/// Expected outcome of one line of a session
enum Expect {
    Prints(&'static str),
    Blank,
    Fails(&'static str),
}
use Expect::*;

/// Feed each line to one interpreter, checking output or error text
fn run_session(lines: &[(&str, Expect)]) {
    let mut interp = Interpreter::new(Vec::new()).unwrap();
    for (i, (input, expected)) in lines.iter().enumerate() {
        let result = interp.rep(input);
        match (result, expected) {
            (Ok(Some(output)), Prints(text)) => {
                assert_eq!(output, *text, "line #{} '{input}'", i + 1);
            }
            (Ok(None), Blank) => {}
            (Err(err), Fails(fragment)) => {
                let message = err.to_string();
                assert!(
                    message.contains(fragment),
                    "line #{} '{input}': error should contain '{fragment}', got: {message}",
                    i + 1
                );
            }
            (Ok(output), _) => panic!("line #{} '{input}': unexpected output {output:?}", i + 1),
            (Err(err), _) => panic!("line #{} '{input}': unexpected error {err}", i + 1),
        }
    }
}

#[test]
fn test_core_language_session() {
    run_session(&[
        ("(def! x 1)", Prints("1")),
        ("(let* (x 2) x)", Prints("2")),
        ("x", Prints("1")),
        ("(if false (undefined-symbol) 42)", Prints("42")),
        ("`(1 2 ~(+ 1 2))", Prints("(1 2 3)")),
        ("`(0 ~@(list 1 2) 3)", Prints("(0 1 2 3)")),
        ("(defmacro! my-if (fn* (c t f) `(if ~c ~t ~f)))", Prints("#<macro>")),
        ("(my-if true 1 2)", Prints("1")),
        ("(macroexpand (my-if true 1 2))", Prints("(if true 1 2)")),
        ("undefined-symbol", Fails("'undefined-symbol' not found")),
        ("", Blank),
        ("  ; comment only", Blank),
    ]);
}

#[test]
fn test_tail_recursive_countdown() {
    run_session(&[
        (
            "(def! countdown (fn* (n) (if (= n 0) :done (countdown (- n 1)))))",
            Prints("#<function>"),
        ),
        ("(countdown 1000000)", Prints(":done")),
    ]);
}

#[test]
fn test_cond_macro() {
    run_session(&[
        (
            "(def! classify (fn* (n) (cond (< n 0) \"negative\" (= n 0) \"zero\" true \"positive\")))",
            Prints("#<function>"),
        ),
        ("(classify -5)", Prints("\"negative\"")),
        ("(classify 0)", Prints("\"zero\"")),
        ("(classify 9)", Prints("\"positive\"")),
        ("(cond)", Prints("nil")),
        ("(cond false 1)", Prints("nil")),
        ("(cond false 1 true)", Fails("odd number of forms to cond")),
    ]);
}

#[test]
fn test_atoms_and_closures() {
    run_session(&[
        ("(def! counter (atom 0))", Prints("(atom 0)")),
        (
            "(def! bump! (fn* (& by) (swap! counter + (if (empty? by) 1 (first by)))))",
            Prints("#<function>"),
        ),
        ("(bump!)", Prints("1")),
        ("(bump! 10)", Prints("11")),
        ("@counter", Prints("11")),
        ("(swap! counter (fn* (n m) (* n m)) 2)", Prints("22")),
        ("(reset! counter :reset)", Prints(":reset")),
        ("(deref counter)", Prints(":reset")),
        ("(atom? counter)", Prints("true")),
    ]);
}

#[test]
fn test_strings_and_printing() {
    run_session(&[
        ("(str \"a\" 1 :k nil)", Prints("\"a1:knil\"")),
        ("(pr-str \"a\" [1 2])", Prints("\"\\\"a\\\" [1 2]\"")),
        ("(read-string \"(+ 1 2)\")", Prints("(+ 1 2)")),
        ("(eval (read-string \"(+ 1 2)\"))", Prints("3")),
        ("(read-string \"\")", Prints("nil")),
        ("{:a [1 2] :b \"c\"}", Prints("{:a [1 2] :b \"c\"}")),
    ]);
}

#[test]
fn test_errors_do_not_corrupt_state() {
    run_session(&[
        ("(def! keep 5)", Prints("5")),
        ("(+ 1", Fails("SyntaxError")),
        ("(1 2)", Fails("not callable")),
        ("(let* (a) a)", Fails("even number")),
        ("(throw \"custom failure\")", Fails("custom failure")),
        ("((fn* (a b) a) 1)", Fails("ArityError")),
        ("keep", Prints("5")),
    ]);
}

#[test]
fn test_deeply_nested_values_survive_printing_and_dropping() {
    run_session(&[
        (
            "(def! nest (fn* (n acc) (if (= n 0) acc (nest (- n 1) (list acc)))))",
            Prints("#<function>"),
        ),
        ("(do (def! deep (nest 300000 nil)) nil)", Prints("nil")),
        ("(count (pr-str deep))", Prints("600003")),
        ("(= deep (nest 300000 nil))", Prints("true")),
        ("(= deep (nest 300000 0))", Prints("false")),
        ("(def! deep nil)", Prints("nil")),
        ("(count (pr-str (nest 300000 nil)))", Prints("600003")),
    ]);
}

#[test]
fn test_self_referencing_atom_prints() {
    run_session(&[
        ("(def! a (atom nil))", Prints("(atom nil)")),
        ("(reset! a a)", Prints("(atom (atom #<cycle>))")),
        ("@a", Prints("(atom (atom #<cycle>))")),
        ("(= a @a)", Prints("true")),
        ("(str a)", Prints("\"(atom (atom #<cycle>))\"")),
        ("(+ 1 1)", Prints("2")),
    ]);
}

#[test]
fn test_load_file() {
    let path = std::env::temp_dir().join(format!("mallet-load-{}.mal", std::process::id()));
    std::fs::write(
        &path,
        "; helpers\n(def! square (fn* (x) (* x x)))\n(def! loaded (square 12))\n",
    )
    .unwrap();

    let mut interp = Interpreter::new(Vec::new()).unwrap();
    let source = path.to_string_lossy().into_owned();
    let result = interp.rep(&format!("(load-file \"{source}\")"));
    let loaded = interp.rep("loaded");
    let direct = interp.load_file(&source);
    std::fs::remove_file(&path).unwrap();

    assert_eq!(result.unwrap().as_deref(), Some("nil"));
    assert_eq!(loaded.unwrap().as_deref(), Some("144"));
    assert!(direct.unwrap().is_nil());
    assert!(matches!(
        interp.load_file("/no/such/mallet/file.mal"),
        Err(Error::EvalError(_))
    ));
}

#[test]
fn test_argv_is_visible() {
    let mut interp = Interpreter::new(vec!["--flag".to_owned(), "value".to_owned()]).unwrap();
    assert_eq!(
        interp.rep("(count *ARGV*)").unwrap().as_deref(),
        Some("2")
    );
    assert_eq!(
        interp.rep("(first *ARGV*)").unwrap().as_deref(),
        Some("\"--flag\"")
    );
}
