//! Diff mode: forward upstream, match against the simulation, and record
//! per-field differences between what the simulation would have served and
//! what upstream actually said. The client always gets the upstream
//! response.

use chrono::Utc;
use serde_json::Value;

use crate::errors::Result;
use crate::journal::{DiffEntry, FieldDiff};
use crate::matching::engine;
use crate::models::request::ParsedRequest;
use crate::models::response::ResponseDetails;
use crate::simulation::RequestView;

use super::{DispatchContext, ProcessOutcome};

pub async fn process(ctx: &DispatchContext, request: &ParsedRequest) -> Result<ProcessOutcome> {
    let upstream = ctx.forward(request).await?;

    let snapshot = ctx.store.snapshot();
    let state = ctx.store.state.snapshot();

    let matching_result = match engine::find_match(&snapshot.pairs, request, &state) {
        Ok(outcome) => {
            let expected = outcome.pair.response();
            let diffs = diff_responses(expected, &upstream);
            let diff_count = diffs.len();
            ctx.diff_journal.record(DiffEntry {
                request: RequestView::from_request(request),
                diffs,
                timestamp: Utc::now(),
            });
            Some(format!("matched pair {}, {diff_count} field(s) differ", outcome.pair_index))
        }
        Err(_) => Some("no pair to diff against".to_string()),
    };

    Ok(ProcessOutcome {
        response: upstream.clone(),
        matched_response: None,
        upstream_response: Some(upstream),
        matching_result,
    })
}

/// Field-level comparison: status, every header the simulated response
/// names, and the body (JSON-aware, so formatting differences don't count).
fn diff_responses(expected: &ResponseDetails, actual: &ResponseDetails) -> Vec<FieldDiff> {
    let mut diffs = Vec::new();

    if expected.status != actual.status {
        diffs.push(FieldDiff {
            field: "status".to_string(),
            expected: expected.status.to_string(),
            actual: actual.status.to_string(),
        });
    }

    for (name, expected_values) in expected.headers.iter() {
        let actual_values = actual.headers.get(name).map(<[String]>::to_vec).unwrap_or_default();
        if *expected_values != actual_values {
            diffs.push(FieldDiff {
                field: format!("header/{name}"),
                expected: expected_values.join(", "),
                actual: actual_values.join(", "),
            });
        }
    }

    if !bodies_equal(expected, actual) {
        diffs.push(FieldDiff {
            field: "body".to_string(),
            expected: expected.body_string(),
            actual: actual.body_string(),
        });
    }

    diffs
}

fn bodies_equal(expected: &ResponseDetails, actual: &ResponseDetails) -> bool {
    if expected.body == actual.body {
        return true;
    }
    match (
        serde_json::from_slice::<Value>(&expected.body),
        serde_json::from_slice::<Value>(&actual.body),
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
