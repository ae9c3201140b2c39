/// Per-table trace filter, as in the original's `Tracer`: a theory logs a
/// line only if the table it concerns is on the allow-list, or the
/// allow-list contains the `*` wildcard.
#[derive(Default, Clone)]
pub struct Tracer {
    tables: Vec<String>,
}

impl Tracer {
    pub fn new() -> Self {
        Tracer { tables: vec![] }
    }

    pub fn trace(&mut self, table: impl Into<String>) {
        self.tables.push(table.into());
    }

    pub fn is_traced(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t == table || t == "*")
    }

    pub fn log(&self, table: &str, msg: &str, depth: usize) {
        if self.is_traced(table) {
            log::debug!("{}{}", "| ".repeat(depth), msg);
        }
    }
}

/// Buffers messages instead of writing to a sink, so that `execute()`'s
/// default hook gives callers (and this crate's own tests) something to
/// assert against, mirroring the original's `ExecutionLogger`.
#[derive(Default)]
pub struct ExecutionLogger {
    messages: Vec<String>,
}

impl ExecutionLogger {
    pub fn new() -> Self {
        ExecutionLogger { messages: vec![] }
    }

    pub fn info(&mut self, msg: impl Into<String>) {
        self.messages.push(msg.into());
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.messages.push(format!("WARN: {}", msg.into()));
    }

    pub fn contents(&self) -> String {
        self.messages.join("\n")
    }

    pub fn empty(&mut self) {
        self.messages.clear();
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}
