//! Suite runner
//!
//! Runs a script's nested suites and tests one at a time inside a client
//! process and reports every lifecycle transition to the result sink.
//!
//! `describe` is declare-then-run: its closure only collects tests, hooks and
//! nested suites into a [`SuiteScope`]; nothing executes until the closure
//! returns. Nested suites run in registration order, interleaved with the
//! parent's tests, and are named after their ancestors (`"A => B"`).
//!
//! Hook resolution: a hook registered on a suite replaces the runner-level
//! default of the same kind for that suite only. Inner suites never inherit an
//! outer suite's hooks.
//!
//! # Record order
//!
//! ```text
//! before hook, StartSuite
//!   beforeEach hook, StartSuiteTest, step, FinishSuiteTest, afterEach hook
//!   ...
//! after hook, FinishSuite
//! ```

pub mod model;
pub mod step;

pub use model::{Suite, TestCase, TestState};
pub use step::{Done, Step, StepFailure, StepResult};

use crate::output::{Record, ResultSink};
use crate::util::time::{now_millis, Stopwatch};
use crate::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Suite that wraps a test registered outside any `describe`
pub const DEFAULT_SUITE_NAME: &str = "Default Suite";

const NAME_SEPARATOR: &str = " => ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HookKind {
    Before,
    After,
    BeforeEach,
    AfterEach,
}

impl HookKind {
    fn label(self) -> &'static str {
        match self {
            HookKind::Before => "before",
            HookKind::After => "after",
            HookKind::BeforeEach => "beforeEach",
            HookKind::AfterEach => "afterEach",
        }
    }
}

#[derive(Debug, Default)]
struct Hooks {
    before: Option<Step>,
    after: Option<Step>,
    before_each: Option<Step>,
    after_each: Option<Step>,
}

impl Hooks {
    fn slot(&mut self, kind: HookKind) -> &mut Option<Step> {
        match kind {
            HookKind::Before => &mut self.before,
            HookKind::After => &mut self.after,
            HookKind::BeforeEach => &mut self.before_each,
            HookKind::AfterEach => &mut self.after_each,
        }
    }
}

enum Entry {
    Test { name: String, step: Step },
    Suite(SuiteScope),
}

/// Declarations collected by one `describe` block
pub struct SuiteScope {
    name: String,
    hooks: Hooks,
    entries: Vec<Entry>,
}

impl SuiteScope {
    fn new(name: String) -> Self {
        Self {
            name,
            hooks: Hooks::default(),
            entries: Vec::new(),
        }
    }

    /// Fully qualified suite name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a test
    pub fn it(&mut self, name: &str, step: Step) {
        self.entries.push(Entry::Test {
            name: name.to_string(),
            step,
        });
    }

    /// Declare a nested suite
    ///
    /// A declaration error aborts the rest of the enclosing declaration.
    pub fn describe<F>(&mut self, name: &str, declare: F) -> Result<()>
    where
        F: FnOnce(&mut SuiteScope) -> Result<()>,
    {
        let mut child = SuiteScope::new(format!("{}{}{}", self.name, NAME_SEPARATOR, name));
        declare(&mut child)?;
        self.entries.push(Entry::Suite(child));
        Ok(())
    }

    pub fn before(&mut self, step: Step) {
        *self.hooks.slot(HookKind::Before) = Some(step);
    }

    pub fn after(&mut self, step: Step) {
        *self.hooks.slot(HookKind::After) = Some(step);
    }

    pub fn before_each(&mut self, step: Step) {
        *self.hooks.slot(HookKind::BeforeEach) = Some(step);
    }

    pub fn after_each(&mut self, step: Step) {
        *self.hooks.slot(HookKind::AfterEach) = Some(step);
    }
}

enum Planned {
    Test(usize, Step),
    Suite(SuiteScope),
}

struct Frame {
    suite: Suite,
    hooks: Hooks,
    clock: Stopwatch,
}

/// Runs suites for one client process
pub struct SuiteRunner {
    sink: Arc<dyn ResultSink>,
    hooks: Hooks,
    stack: Vec<Frame>,
}

impl SuiteRunner {
    pub fn new(sink: Arc<dyn ResultSink>) -> Self {
        Self {
            sink,
            hooks: Hooks::default(),
            stack: Vec::new(),
        }
    }

    /// Number of suites currently open
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Default `before` hook for suites that do not set their own
    pub fn before(&mut self, step: Step) {
        *self.hooks.slot(HookKind::Before) = Some(step);
    }

    pub fn after(&mut self, step: Step) {
        *self.hooks.slot(HookKind::After) = Some(step);
    }

    pub fn before_each(&mut self, step: Step) {
        *self.hooks.slot(HookKind::BeforeEach) = Some(step);
    }

    pub fn after_each(&mut self, step: Step) {
        *self.hooks.slot(HookKind::AfterEach) = Some(step);
    }

    /// Declare a suite, then run it to completion
    ///
    /// Only a declaration error is returned; test and hook failures are
    /// recorded on the emitted records.
    pub async fn describe<F>(&mut self, name: &str, declare: F) -> Result<()>
    where
        F: FnOnce(&mut SuiteScope) -> Result<()>,
    {
        let qualified = match self.stack.last() {
            Some(parent) => format!("{}{}{}", parent.suite.name, NAME_SEPARATOR, name),
            None => name.to_string(),
        };

        let mut scope = SuiteScope::new(qualified);
        declare(&mut scope)?;
        self.run_suite(scope, false).await;
        Ok(())
    }

    /// Run a single test in its own default suite
    pub async fn it(&mut self, name: &str, step: Step) {
        let mut scope = SuiteScope::new(DEFAULT_SUITE_NAME.to_string());
        scope.it(name, step);
        self.run_suite(scope, true).await;
    }

    /// Close every suite still open and reset the default hooks
    ///
    /// Suites are only left open when a `describe` future is dropped before
    /// completing.
    pub async fn finish(&mut self) {
        while !self.stack.is_empty() {
            self.close_suite().await;
        }
        self.hooks = Hooks::default();
    }

    fn run_suite(&mut self, scope: SuiteScope, execute_immediately: bool) -> BoxFuture<'_, ()> {
        async move {
            let SuiteScope {
                name,
                hooks,
                entries,
            } = scope;

            let clock = Stopwatch::start();
            let mut suite = Suite::new(name, clock.started_at(), execute_immediately);
            let mut planned = Vec::with_capacity(entries.len());
            for entry in entries {
                match entry {
                    Entry::Test { name, step } => {
                        let test = TestCase::new(&suite, &name, now_millis());
                        suite.tests.push(test);
                        planned.push(Planned::Test(suite.tests.len() - 1, step));
                    }
                    Entry::Suite(child) => planned.push(Planned::Suite(child)),
                }
            }

            self.stack.push(Frame {
                suite,
                hooks,
                clock,
            });
            self.open_suite().await;

            for item in planned {
                match item {
                    Planned::Test(index, step) => self.run_test(index, step).await,
                    Planned::Suite(child) => self.run_suite(child, false).await,
                }
            }

            self.close_suite().await;
        }
        .boxed()
    }

    async fn open_suite(&mut self) {
        if let Some(failure) = self.run_hook(HookKind::Before).await {
            self.hook_failed(HookKind::Before, &failure);
        }

        let Some(frame) = self.stack.last() else {
            return;
        };
        info!(suite = %frame.suite.name, tests = frame.suite.tests.len(), "Suite started");
        let record = Record::StartSuite(frame.suite.clone());
        self.emit(record);
    }

    async fn close_suite(&mut self) {
        let Some(frame) = self.stack.last_mut() else {
            return;
        };
        frame.suite.finished = Some(now_millis());
        frame.suite.duration = Some(frame.clock.elapsed_millis());

        if let Some(failure) = self.run_hook(HookKind::After).await {
            self.hook_failed(HookKind::After, &failure);
        }

        let Some(frame) = self.stack.pop() else {
            return;
        };
        info!(
            suite = %frame.suite.name,
            has_error = frame.suite.has_error,
            duration_ms = frame.clock.elapsed_millis(),
            "Suite finished"
        );
        self.emit(Record::FinishSuite(frame.suite));
    }

    async fn run_test(&mut self, index: usize, mut step: Step) {
        let before_each = self.run_hook(HookKind::BeforeEach).await;

        let clock = Stopwatch::start();
        let Some(started) = self.test_mut(index).map(|test| {
            test.started = clock.started_at();
            test.clone()
        }) else {
            return;
        };
        debug!(test = %started.name, shape = step.kind(), "Test started");
        self.emit(Record::StartSuiteTest(started));

        let outcome = match before_each {
            Some(failure) => Err(StepFailure {
                message: format!("beforeEach hook failed: {}", failure.message),
                ..failure
            }),
            None => step.run().await,
        };
        if let Err(failure) = &outcome {
            debug!(error_type = %failure.error_type, error = %failure.message, "Test failed");
            if let Some(frame) = self.stack.last_mut() {
                frame.suite.has_error = true;
            }
        }

        let Some(finished) = self.test_mut(index).map(|test| {
            test.settle(outcome, now_millis(), clock.elapsed_millis());
            test.clone()
        }) else {
            return;
        };
        debug!(test = %finished.name, state = ?finished.state, "Test finished");
        self.emit(Record::FinishSuiteTest(finished));

        if let Some(failure) = self.run_hook(HookKind::AfterEach).await {
            self.hook_failed(HookKind::AfterEach, &failure);
        }
    }

    /// Run the current suite's hook of `kind`, falling back to the default
    async fn run_hook(&mut self, kind: HookKind) -> Option<StepFailure> {
        let frame = self.stack.last_mut()?;
        let hook = match frame.hooks.slot(kind) {
            Some(hook) => hook,
            None => self.hooks.slot(kind).as_mut()?,
        };
        hook.run().await.err()
    }

    fn hook_failed(&mut self, kind: HookKind, failure: &StepFailure) {
        if let Some(frame) = self.stack.last_mut() {
            warn!(suite = %frame.suite.name, hook = kind.label(), error = %failure.message, "Hook failed");
            frame.suite.has_error = true;
        }
    }

    fn test_mut(&mut self, index: usize) -> Option<&mut TestCase> {
        self.stack.last_mut()?.suite.tests.get_mut(index)
    }

    fn emit(&self, record: Record) {
        if let Err(e) = self.sink.emit(&record) {
            error!(record = record.kind(), error = %format!("{:#}", e), "Failed to write result record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::MemorySink;
    use anyhow::{anyhow, bail};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn runner() -> (SuiteRunner, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        (SuiteRunner::new(sink.clone()), sink)
    }

    fn pass() -> Step {
        Step::sync(|| Ok(()))
    }

    fn fail(message: &'static str) -> Step {
        Step::sync(move || Err(anyhow!(message)))
    }

    fn counting(counter: &Arc<AtomicUsize>) -> Step {
        let counter = counter.clone();
        Step::sync(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    /// (record type, suite or test name)
    fn trail(sink: &MemorySink) -> Vec<(&'static str, String)> {
        sink.records()
            .into_iter()
            .map(|record| {
                let name = match &record {
                    Record::StartSuite(s) | Record::FinishSuite(s) => s.name.clone(),
                    Record::StartSuiteTest(t) | Record::FinishSuiteTest(t) => t.name.clone(),
                    _ => String::new(),
                };
                (record.kind(), name)
            })
            .collect()
    }

    fn finished_tests(sink: &MemorySink) -> Vec<TestCase> {
        sink.records()
            .into_iter()
            .filter_map(|r| match r {
                Record::FinishSuiteTest(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    fn finished_suites(sink: &MemorySink) -> Vec<Suite> {
        sink.records()
            .into_iter()
            .filter_map(|r| match r {
                Record::FinishSuite(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_failing_test_does_not_stop_siblings() {
        let (mut runner, sink) = runner();

        runner
            .describe("A", |s| {
                s.it("t1", pass());
                s.it("t2", fail("nope"));
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(
            trail(&sink),
            vec![
                ("StartSuite", "A".to_string()),
                ("StartSuiteTest", "t1".to_string()),
                ("FinishSuiteTest", "t1".to_string()),
                ("StartSuiteTest", "t2".to_string()),
                ("FinishSuiteTest", "t2".to_string()),
                ("FinishSuite", "A".to_string()),
            ]
        );

        let tests = finished_tests(&sink);
        assert_eq!(tests[0].state, TestState::Passed);
        assert_eq!(tests[1].state, TestState::Failed);
        assert_eq!(tests[1].error.as_deref(), Some("nope"));
        assert_eq!(tests[1].error_type.as_deref(), Some("Error"));

        let suite = &finished_suites(&sink)[0];
        assert!(suite.has_error);
        assert!(!suite.execute_immediately);
        assert!(suite.finished.is_some());
        assert_eq!(suite.tests.len(), 2);
        assert_eq!(runner.depth(), 0);
    }

    #[tokio::test]
    async fn test_start_suite_lists_pending_tests() {
        let (mut runner, sink) = runner();
        runner
            .describe("A", |s| {
                s.it("t1", pass());
                Ok(())
            })
            .await
            .unwrap();

        match &sink.records()[0] {
            Record::StartSuite(suite) => {
                assert_eq!(suite.tests.len(), 1);
                assert_eq!(suite.tests[0].state, TestState::Pending);
                assert_eq!(suite.tests[0].suite_id, suite.id);
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_nested_suite_names_and_order() {
        let (mut runner, sink) = runner();

        runner
            .describe("A", |s| {
                s.it("a1", pass());
                s.describe("B", |s| {
                    s.describe("C", |s| {
                        s.it("c1", pass());
                        Ok(())
                    })?;
                    s.it("b1", pass());
                    Ok(())
                })?;
                s.it("a2", pass());
                Ok(())
            })
            .await
            .unwrap();

        let suites: Vec<String> = trail(&sink)
            .into_iter()
            .filter(|(kind, _)| *kind == "StartSuite")
            .map(|(_, name)| name)
            .collect();
        assert_eq!(suites, ["A", "A => B", "A => B => C"]);

        let order: Vec<String> = trail(&sink)
            .into_iter()
            .filter(|(kind, _)| *kind != "StartSuiteTest")
            .map(|(kind, name)| format!("{} {}", kind, name))
            .collect();
        assert_eq!(
            order,
            [
                "StartSuite A",
                "FinishSuiteTest a1",
                "StartSuite A => B",
                "StartSuite A => B => C",
                "FinishSuiteTest c1",
                "FinishSuite A => B => C",
                "FinishSuiteTest b1",
                "FinishSuite A => B",
                "FinishSuiteTest a2",
                "FinishSuite A",
            ]
        );

        let c1 = &finished_tests(&sink)[1];
        assert_eq!(c1.suite_name, "A => B => C");
        assert_eq!(runner.depth(), 0);
    }

    #[tokio::test]
    async fn test_bare_it_runs_in_default_suite() {
        let (mut runner, sink) = runner();

        runner.it("standalone", pass()).await;

        assert_eq!(
            trail(&sink),
            vec![
                ("StartSuite", DEFAULT_SUITE_NAME.to_string()),
                ("StartSuiteTest", "standalone".to_string()),
                ("FinishSuiteTest", "standalone".to_string()),
                ("FinishSuite", DEFAULT_SUITE_NAME.to_string()),
            ]
        );
        assert!(finished_suites(&sink)[0].execute_immediately);
        assert_eq!(runner.depth(), 0);
    }

    #[tokio::test]
    async fn test_declaration_error_propagates() {
        let (mut runner, sink) = runner();
        let ran = Arc::new(AtomicUsize::new(0));

        let ran_in_decl = ran.clone();
        let err = runner
            .describe("A", |s| {
                s.it("t1", counting(&ran_in_decl));
                s.describe("B", |_| bail!("bad declaration"))?;
                s.it("t2", counting(&ran_in_decl));
                Ok(())
            })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "bad declaration");
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(sink.records().is_empty());
        assert_eq!(runner.depth(), 0);
    }

    #[tokio::test]
    async fn test_suite_hook_overrides_default_without_inheritance() {
        let (mut runner, _sink) = runner();
        let global = Arc::new(AtomicUsize::new(0));
        let outer = Arc::new(AtomicUsize::new(0));
        runner.before_each(counting(&global));

        let outer_hook = outer.clone();
        runner
            .describe("Outer", |s| {
                s.before_each(counting(&outer_hook));
                s.it("o1", pass());
                s.it("o2", pass());
                s.describe("Inner", |s| {
                    s.it("i1", pass());
                    Ok(())
                })
            })
            .await
            .unwrap();

        // Outer tests use the suite's hook, the inner suite falls back to the default
        assert_eq!(outer.load(Ordering::SeqCst), 2);
        assert_eq!(global.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hook_order() {
        let (mut runner, _sink) = runner();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let record = |label: &'static str| {
            let log = log.clone();
            Step::sync(move || {
                log.lock().unwrap().push(label);
                Ok(())
            })
        };

        runner.before(record("before"));
        runner.after(record("after"));
        runner.after_each(record("afterEach"));
        runner
            .describe("S", |s| {
                s.before_each(record("beforeEach"));
                s.it("t1", record("t1"));
                s.it("t2", record("t2"));
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            [
                "before",
                "beforeEach",
                "t1",
                "afterEach",
                "beforeEach",
                "t2",
                "afterEach",
                "after"
            ]
        );
    }

    #[tokio::test]
    async fn test_before_each_failure_fails_test_without_running_it() {
        let (mut runner, sink) = runner();
        let ran = Arc::new(AtomicUsize::new(0));

        let ran_step = ran.clone();
        runner
            .describe("S", |s| {
                s.before_each(fail("no session"));
                s.it("t", counting(&ran_step));
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 0);
        let test = &finished_tests(&sink)[0];
        assert_eq!(test.state, TestState::Failed);
        assert_eq!(test.error.as_deref(), Some("beforeEach hook failed: no session"));
        assert!(finished_suites(&sink)[0].has_error);
    }

    #[tokio::test]
    async fn test_after_hook_failure_marks_suite() {
        let (mut runner, sink) = runner();
        runner
            .describe("S", |s| {
                s.after(fail("cleanup failed"));
                s.it("t", pass());
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(finished_tests(&sink)[0].state, TestState::Passed);
        assert!(finished_suites(&sink)[0].has_error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_callback_and_panicking_steps() {
        let (mut runner, sink) = runner();

        runner
            .describe("Shapes", |s| {
                s.it(
                    "async",
                    Step::future(|| async {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                        Ok(())
                    }),
                );
                s.it(
                    "callback",
                    Step::callback(|done| {
                        tokio::spawn(async move {
                            tokio::time::sleep(Duration::from_millis(300)).await;
                            done.fail(anyhow!("callback error"));
                        });
                    }),
                );
                s.it("panics", Step::sync(|| panic!("kaboom")));
                s.it("after panic", pass());
                Ok(())
            })
            .await
            .unwrap();

        let tests = finished_tests(&sink);
        assert_eq!(tests.len(), 4);
        assert_eq!(tests[0].state, TestState::Passed);
        assert_eq!(tests[0].duration, Some(2000));
        assert_eq!(tests[1].error.as_deref(), Some("callback error"));
        assert_eq!(tests[2].error_type.as_deref(), Some("panic"));
        assert_eq!(tests[2].error.as_deref(), Some("kaboom"));
        assert_eq!(tests[3].state, TestState::Passed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_closes_abandoned_suites() {
        let (mut runner, sink) = runner();
        let after = Arc::new(AtomicUsize::new(0));
        runner.after(counting(&after));

        let hung = tokio::time::timeout(
            Duration::from_secs(5),
            runner.describe("Hung", |s| {
                s.it("waits forever", Step::future(futures::future::pending));
                Ok(())
            }),
        )
        .await;
        assert!(hung.is_err());
        assert_eq!(runner.depth(), 1);

        runner.finish().await;
        assert_eq!(runner.depth(), 0);
        assert_eq!(after.load(Ordering::SeqCst), 1);

        let last = sink.records().pop().unwrap();
        assert!(matches!(last, Record::FinishSuite(ref s) if s.name == "Hung"));

        // Default hooks are cleared
        runner.it("t", pass()).await;
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }
}
