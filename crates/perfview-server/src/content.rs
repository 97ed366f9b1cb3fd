//! Range-content builders: the query pipeline plus the cacheable body
//! renderers.
//!
//! `get_data_table` is the full range pipeline in order: read + merge,
//! column sort (with the `!` trick keeping the X label leftmost),
//! regression, X-axis reassignment, row sorts, reverse, equal-X rewrite,
//! and final row-length normalization.

use crate::requests::{
    self, flag_from_query, make_regression_params, make_row_range_reqs, make_row_req,
    BinderDefaults,
};
use perfview_core::names::TIME_NAME;
use perfview_core::{Error, Result};
use perfview_store::{Engine, RowRangeRequests};
use perfview_table::DataTable;
use tracing::debug;

/// Reads and merges the requested sources, returning a table with the
/// X axis as time, all other columns sorted by name, and no specified row
/// order.
async fn get_data_table_raw(engine: &Engine, req: &RowRangeRequests) -> Result<DataTable> {
    if req.filtered_sources.is_empty() {
        return Err(Error::BadInput("no sources selected".to_string()));
    }
    let mut table = engine.read_rows(req).await?;

    if !table.column_names.is_empty() {
        // Force the X column to sort first, then drop the marker.
        let original_name = table.column_names[0].clone();
        table.column_names[0] = format!("!{original_name}");
        table.sort_data_columns();
        table.column_names[0] = original_name;
    }

    Ok(table)
}

/// The full pipeline: a table with the X axis as requested and rows sorted
/// by it.
pub async fn get_data_table(
    engine: &Engine,
    defaults: &BinderDefaults,
    raw_query: &str,
) -> Result<DataTable> {
    let req = make_row_range_reqs(raw_query, defaults)?;
    let mut table = get_data_table_raw(engine, &req).await?;

    let regression_params = make_regression_params(raw_query)?;
    if regression_params.selected {
        // Regression needs an ascending time sort, so sort first while the
        // X axis is still time.
        table.sort_rows();
        table.get_verified_regression(&regression_params);
    }

    let time_sort = req.sort_by_column == TIME_NAME;
    if !time_sort {
        table.change_x_axis_to_column_from_time(&req.sort_by_column)?;
    }

    // Sort unless the regression step already did and the axis is
    // unchanged.
    if !regression_params.selected || !time_sort {
        table.sort_rows();
    }

    if !req.sort_by_config.is_empty() {
        let from_time = table.timestamps.is_none();
        table.change_x_axis_to_config_column(&req.sort_by_config, from_time)?;
        // Stable, to keep the prior order as the second sort level
        // (typically <configKey>:<time>).
        table.sort_rows_stable();
    }

    if flag_from_query(raw_query, "reverse") {
        table.reverse_rows();
    }

    if req.equal_x {
        // Only after all sorting is done.
        if table.timestamps.is_some() {
            table.overwrite_x_axis_with_record_num();
        } else {
            table.change_x_axis_to_record_num_from_time();
        }
    }

    table.fix_row_lengths();
    table.fix_config_row_lengths();
    Ok(table)
}

/// Content builder for `srcs-json`.
pub async fn make_srcs_json_content(
    engine: &Engine,
    defaults: &BinderDefaults,
    raw_query: &str,
) -> Result<Vec<u8>> {
    let table = get_data_table(engine, defaults, raw_query).await?;
    serde_json::to_vec(&table).map_err(|e| Error::Internal(format!("json marshalling: {e}")))
}

/// Content builder for `record-json`.
pub async fn make_record_json_content(engine: &Engine, raw_query: &str) -> Result<Vec<u8>> {
    let req = make_row_req(raw_query);
    debug!(row_key = %req.id, "record read");
    let record = engine.read_row(&req).await?;
    serde_json::to_vec(&record).map_err(|e| Error::Internal(format!("json marshalling: {e}")))
}

/// Content builder for `srcs-inline-graph`: a self-contained HTML document
/// embedding the table for ad-hoc embedding; full dashboard templating is
/// an external collaborator.
pub async fn make_srcs_inline_graph_content(
    engine: &Engine,
    defaults: &BinderDefaults,
    raw_query: &str,
) -> Result<Vec<u8>> {
    let table = get_data_table(engine, defaults, raw_query).await?;
    let table_json = serde_json::to_string(&table)
        .map_err(|e| Error::Internal(format!("json marshalling: {e}")))?;
    let x_label = table
        .column_names
        .first()
        .cloned()
        .unwrap_or_else(|| TIME_NAME.to_string());

    let mut body = String::with_capacity(table_json.len() + 512);
    body.push_str("<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>");
    body.push_str(&html_escape(&x_label));
    body.push_str("</title></head>\n<body>\n<div id=\"graph\"></div>\n<script>\nvar table = ");
    body.push_str(&table_json);
    body.push_str(";\n</script>\n</body></html>\n");
    Ok(body.into_bytes())
}

/// Renders the search result list for `GET /search`.
pub fn render_search_page(title: &str, names: &[String]) -> String {
    let mut page = String::with_capacity(256 + names.len() * 64);
    page.push_str("<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>");
    page.push_str(&html_escape(title));
    page.push_str("</title></head>\n<body>\n<h1>");
    page.push_str(&html_escape(title));
    page.push_str("</h1>\n<ul>\n");
    for name in names {
        page.push_str("<li><a href=\"/srcs?src=");
        page.push_str(&requests::url_escape(name));
        page.push_str("\">");
        page.push_str(&html_escape(name));
        page.push_str("</a></li>\n");
    }
    page.push_str("</ul>\n</body></html>\n");
    page
}

fn html_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
