mod support;

mod bigquery_test;
mod format_test;
mod rpc_test;
