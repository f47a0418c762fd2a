use tracing::{debug, info, info_span};
use uuid::Uuid;

use super::{batch_scalars, check_device_result, FvRepository};
use crate::batch;
use crate::error::{FvError, Result};
use crate::handles::{SearchRequest, SearchResult};
use crate::protocol::args::SEARCH_ARGS;
use crate::protocol::SearchMode;

impl FvRepository {
    /// Run a similarity search, filling the output arrays of `result`.
    ///
    /// In N:M mode queries are submitted in batches of at most
    /// `batching.search_max`. Both mirrors are copied in once before the
    /// first batch and the result descriptor is read back once, after the
    /// last batch.
    pub fn search(
        &self,
        mode: SearchMode,
        request: &SearchRequest,
        result: &mut SearchResult<'_>,
    ) -> Result<()> {
        let span = info_span!("fv_search", call_id = %Uuid::new_v4(), %mode);
        let _enter = span.enter();

        let table = request.table();
        let query_count = table.query_count();
        if query_count != result.query_count() {
            return Err(FvError::invalid(
                "queryCnt",
                format!(
                    "input queryCnt {query_count} must equal result queryCnt {}",
                    result.query_count()
                ),
            ));
        }
        let input_ptr = request.mirror().checked_ptr("searchInput")?;
        let result_ptr = result.mirror().checked_ptr("searchResult")?;

        let needed = u64::from(query_count) * u64::from(request.top_k()) * 4;
        if u64::from(result.data_len()) < needed {
            return Err(FvError::invalid(
                "dataLen",
                format!(
                    "{} should not be less than queryCnt:{query_count} * topK:{} * 4",
                    result.data_len(),
                    request.top_k()
                ),
            ));
        }
        let limit = self.batching.query_count_max;
        if query_count > limit {
            return Err(FvError::invalid(
                "queryCnt",
                format!("{query_count} can't be larger than {limit}"),
            ));
        }
        if mode == SearchMode::NToM {
            if query_count == 0 {
                return Err(FvError::invalid("queryCnt", "N:M search needs at least one query"));
            }
            let expected = u64::from(query_count) * u64::from(table.entry_len());
            if expected != u64::from(table.data_len()) {
                return Err(FvError::invalid(
                    "tableDataLen",
                    format!(
                        "queryCnt * tableLen = {expected} != tableDataLen {}",
                        table.data_len()
                    ),
                ));
            }
        }

        let plan = batch::plan(mode, u64::from(query_count), self.batching.search_max);
        info!(queries = query_count, top_k = request.top_k(), batches = plan.len(), "search start");

        let batches = plan.iter().map(batch_scalars).collect::<Result<Vec<_>>>()?;

        let call = self.open_call()?;
        request.mirror().copy_in(&request.raw(), call.run_mode, &call.stream)?;
        result.mirror().copy_in(&result.raw(), call.run_mode, &call.stream)?;
        for (count, index) in batches {
            let mut args = SEARCH_ARGS.builder();
            args.push_addr(input_ptr)?.push_addr(result_ptr)?;
            args.push_u32(mode.tag())?
                .push_u32(call.signal.id())?
                .push_u32(count)?
                .push_u32(index)?;
            let args = args.finish()?;

            self.invoker
                .invoke_and_wait(&self.kernels.search, &args, &call.stream, &call.signal)?;
            debug!(count, index, "search batch done");
        }
        call.stream.synchronize()?;

        let out = result.mirror().copy_out(call.run_mode)?;
        result.set_device_result(out.ret);
        check_device_result("search", out.ret)?;
        info!("search success");
        Ok(())
    }
}
