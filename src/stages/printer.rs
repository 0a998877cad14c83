//! The three result printers: a colourised CLI table, a JSON array, and a
//! file sink reusing the JSON serializer. All three opt into discarded
//! items (`process_discarded`) so auto-filtered/filtered noise is still
//! counted in the final tallies even when it isn't shown.

use std::fs::File;
use std::io::Write;

use log::error;
use serde::Serialize;

use crate::error::Result;
use crate::item::{FuzzResult, ItemType};
use crate::queue::{PipelineItem, StageContext, StageLogic};

#[derive(Serialize)]
struct PluginFindingView {
    name: String,
    message: String,
    severity: String,
}

#[derive(Serialize)]
struct ResultView {
    result_number: u64,
    url: String,
    method: String,
    code: u16,
    lines: usize,
    words: usize,
    chars: usize,
    timer_ms: u128,
    server: Option<String>,
    location: Option<String>,
    discarded: bool,
    plugins: Vec<PluginFindingView>,
}

impl ResultView {
    fn from_result(result: &FuzzResult) -> Self {
        let response = result.history.response.as_ref();
        ResultView {
            result_number: result.result_number,
            url: result.url.clone(),
            method: result.history.request.method.as_str().to_string(),
            code: result.code(),
            lines: result.lines,
            words: result.words,
            chars: result.chars,
            timer_ms: result.timer.as_millis(),
            server: response.and_then(|r| r.headers.get("Server")).map(str::to_string),
            location: response.and_then(|r| r.headers.get("Location")).map(str::to_string),
            discarded: result.item.discarded,
            plugins: result
                .plugins_res
                .iter()
                .map(|f| PluginFindingView {
                    name: f.plugin_name.clone(),
                    message: f.message.clone(),
                    severity: format!("{:?}", f.severity),
                })
                .collect(),
        }
    }
}

/// Prints one line per result to stdout, suppressed entirely by `-c`...
/// actually `-c` only disables colour; `-a` (quiet/no-progress) is what
/// suppresses the per-result line, tracked here as `quiet`.
pub struct CliPrinter {
    colour: bool,
    quiet: bool,
}

impl CliPrinter {
    pub fn new(colour: bool, quiet: bool) -> Self {
        Self { colour, quiet }
    }

    fn line(&self, result: &FuzzResult) -> String {
        let base = format!(
            "{:>6}  C={:<3} L={:<5} W={:<5} Ch={:<6} {}",
            result.result_number,
            result.code(),
            result.lines,
            result.words,
            result.chars,
            result.url,
        );
        if result.item.discarded {
            if self.colour {
                format!("\x1b[2m{base} [discarded]\x1b[0m")
            } else {
                format!("{base} [discarded]")
            }
        } else if self.colour {
            format!("\x1b[32m{base}\x1b[0m")
        } else {
            base
        }
    }
}

/// Buffers results and serializes them as a JSON array, either to stdout
/// (`JsonPrinter`) or to a configured path (`FilePrinter`).
pub struct JsonPrinter {
    buffer: Vec<ResultView>,
    to_stdout: bool,
}

impl JsonPrinter {
    pub fn new(to_stdout: bool) -> Self {
        Self {
            buffer: Vec::new(),
            to_stdout,
        }
    }

    pub fn serialize(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.buffer)
            .map_err(|e| crate::error::Error::Internal(format!("json serialize: {e}")))
    }
}

pub struct FilePrinter {
    path: String,
    inner: JsonPrinter,
}

impl FilePrinter {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            inner: JsonPrinter::new(false),
        }
    }
}

/// Common behavior every printer stage drives: record one result, and
/// flush whatever buffering it does at shutdown.
pub trait ResultPrinter: Send {
    fn on_item(&mut self, result: &FuzzResult);
    fn finish(&mut self) {}
}

impl ResultPrinter for CliPrinter {
    fn on_item(&mut self, result: &FuzzResult) {
        if !self.quiet {
            println!("{}", self.line(result));
        }
    }
}

impl ResultPrinter for JsonPrinter {
    fn on_item(&mut self, result: &FuzzResult) {
        self.buffer.push(ResultView::from_result(result));
    }

    fn finish(&mut self) {
        if self.to_stdout {
            if let Ok(json) = self.serialize() {
                println!("{json}");
            }
        }
    }
}

impl ResultPrinter for FilePrinter {
    fn on_item(&mut self, result: &FuzzResult) {
        self.inner.on_item(result);
    }

    fn finish(&mut self) {
        let json = match self.inner.serialize() {
            Ok(json) => json,
            Err(e) => {
                error!("failed to serialize results for {}: {e}", self.path);
                return;
            }
        };
        match File::create(&self.path).and_then(|mut f| f.write_all(json.as_bytes())) {
            Ok(()) => {}
            Err(e) => error!("failed to write results to {}: {e}", self.path),
        }
    }
}

/// Wraps a [`ResultPrinter`] as a pipeline stage: prints every `RESULT`
/// (including discarded ones) as a side effect and always forwards it
/// unchanged.
pub struct PrinterStage<P: ResultPrinter> {
    printer: P,
}

impl<P: ResultPrinter> PrinterStage<P> {
    pub fn new(printer: P) -> Self {
        Self { printer }
    }
}

impl<P: ResultPrinter> StageLogic for PrinterStage<P> {
    fn name(&self) -> &'static str {
        "printer"
    }

    fn handles(&self, item_type: ItemType) -> bool {
        matches!(item_type, ItemType::Result)
    }

    fn process_discarded(&self) -> bool {
        true
    }

    fn process(&mut self, item: PipelineItem, ctx: &StageContext) -> Result<()> {
        if let Some(fuzz) = item.as_fuzz() {
            self.printer.on_item(fuzz);
        }
        ctx.output.send(item);
        Ok(())
    }

    fn on_cleanup(&mut self, _ctx: &StageContext) {
        self.printer.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::HttpCache;
    use crate::item::{FuzzResult, HeaderList, Method, Request, Response};
    use crate::queue::{PriorityQueue, SeedLedger};
    use crate::stats::FuzzStats;
    use std::sync::Arc;
    use std::time::Duration;

    fn ctx() -> StageContext {
        StageContext {
            output: PriorityQueue::new(),
            discard: PriorityQueue::new(),
            stats: Arc::new(FuzzStats::new()),
            cache: Arc::new(HttpCache::new()),
            ledger: Arc::new(SeedLedger::default()),
        }
    }

    fn sample() -> FuzzResult {
        let mut r = FuzzResult::new(
            "http://h/x".into(),
            Request {
                method: Method::Get,
                url: "http://h/x".into(),
                headers: HeaderList::default(),
                body: None,
                follow_redirects: false,
            },
            crate::payload::PayloadManager::empty(),
        );
        r.apply_response(
            Response {
                status: 200,
                headers: HeaderList::default(),
                body: b"ok".to_vec(),
                elapsed: Duration::default(),
            },
            "ok",
        );
        r
    }

    #[test]
    fn json_printer_buffers_and_serializes() {
        let mut printer = JsonPrinter::new(true);
        printer.on_item(&sample());
        let json = printer.serialize().unwrap();
        assert!(json.contains("\"code\": 200"));
    }

    #[test]
    fn printer_stage_forwards_every_item() {
        let ctx = ctx();
        let mut stage = PrinterStage::new(JsonPrinter::new(false));
        stage
            .process(PipelineItem::Fuzz(sample()), &ctx)
            .unwrap();
        assert_eq!(ctx.output.len(), 1);
    }
}
