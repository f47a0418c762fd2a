//! Repository add, range delete and single-record delete/modify.

use tracing::{debug, info, info_span};
use uuid::Uuid;

use super::{batch_scalars, check_device_result, FvRepository};
use crate::batch;
use crate::error::{FvError, Result};
use crate::handles::{FeatureRecord, RepoRange};
use crate::protocol::args::{ACCURATE_ARGS, REPO_ADD_ARGS, REPO_DEL_ARGS};
use crate::protocol::{AccurateKind, SearchMode};

impl FvRepository {
    /// Add `record` to the repository.
    ///
    /// 1:N is a single broadcast invocation. N:M splits the features into
    /// batches of at most `batching.repo_add_max`, each carrying its count and
    /// cumulative offset.
    pub fn repo_add(&self, mode: SearchMode, record: &mut FeatureRecord) -> Result<()> {
        let span = info_span!("fv_repo_add", call_id = %Uuid::new_v4(), %mode);
        let _enter = span.enter();

        let ptr = record.mirror().checked_ptr("featureInfo")?;
        if mode == SearchMode::NToM {
            validate_bulk_add(record)?;
        }
        let plan = batch::plan(
            mode,
            u64::from(record.feature_count()),
            self.batching.repo_add_max,
        );
        info!(
            id0 = record.id0(),
            id1 = record.id1(),
            features = record.feature_count(),
            batches = plan.len(),
            "repo add start"
        );

        let batches = plan.iter().map(batch_scalars).collect::<Result<Vec<_>>>()?;

        let call = self.open_call()?;
        // Copied in once; every batch writes its result into the same mirror.
        record.mirror().copy_in(&record.raw(), call.run_mode, &call.stream)?;
        for (count, offset) in batches {
            let mut args = REPO_ADD_ARGS.builder();
            args.push_addr(ptr)?;
            args.push_u32(mode.tag())?
                .push_u32(call.signal.id())?
                .push_u32(count)?
                .push_u32(offset)?;
            let args = args.finish()?;

            self.invoker
                .invoke_and_wait(&self.kernels.repo_add, &args, &call.stream, &call.signal)?;
            debug!(count, offset, "repo add batch done");
        }
        call.stream.synchronize()?;

        let out = record.mirror().copy_out(call.run_mode)?;
        record.set_device_result(out.ret);
        check_device_result("repo add", out.ret)?;
        info!("repo add success");
        Ok(())
    }

    /// Delete every record whose `(id0, id1)` lies in `range`.
    pub fn repo_del(&self, mode: SearchMode, range: &mut RepoRange) -> Result<()> {
        let span = info_span!("fv_repo_del", call_id = %Uuid::new_v4(), %mode);
        let _enter = span.enter();

        let ptr = range.mirror().checked_ptr("repoRange")?;
        info!(id0 = ?range.id0(), id1 = ?range.id1(), "repo del start");

        let call = self.open_call()?;
        let mut args = REPO_DEL_ARGS.builder();
        args.push_addr(ptr)?;
        args.push_u32(mode.tag())?.push_u32(call.signal.id())?;
        let args = args.finish()?;

        range.mirror().copy_in(&range.raw(), call.run_mode, &call.stream)?;
        self.invoker
            .invoke_and_wait(&self.kernels.repo_del, &args, &call.stream, &call.signal)?;
        call.stream.synchronize()?;

        let out = range.mirror().copy_out(call.run_mode)?;
        range.set_device_result(out.ret);
        check_device_result("repo del", out.ret)?;
        info!("repo del success");
        Ok(())
    }

    /// Delete or modify the single record described by `record`.
    ///
    /// Both share one kernel; `kind` travels as an argument.
    pub fn accurate_del_or_modify(
        &self,
        kind: AccurateKind,
        record: &mut FeatureRecord,
    ) -> Result<()> {
        let span = info_span!("fv_accurate", call_id = %Uuid::new_v4(), ?kind);
        let _enter = span.enter();

        let ptr = record.mirror().checked_ptr("featureInfo")?;
        info!(id0 = record.id0(), id1 = record.id1(), offset = record.offset(), "accurate op start");

        let call = self.open_call()?;
        let mut args = ACCURATE_ARGS.builder();
        args.push_addr(ptr)?;
        args.push_u32(kind.tag())?.push_u32(call.signal.id())?;
        let args = args.finish()?;

        record.mirror().copy_in(&record.raw(), call.run_mode, &call.stream)?;
        self.invoker.invoke_and_wait(
            &self.kernels.accurate_del_or_modify,
            &args,
            &call.stream,
            &call.signal,
        )?;
        call.stream.synchronize()?;

        let out = record.mirror().copy_out(call.run_mode)?;
        record.set_device_result(out.ret);
        check_device_result("accurate delete or modify", out.ret)?;
        info!("accurate op success");
        Ok(())
    }

    pub fn delete(&self, record: &mut FeatureRecord) -> Result<()> {
        self.accurate_del_or_modify(AccurateKind::Delete, record)
    }

    pub fn modify(&self, record: &mut FeatureRecord) -> Result<()> {
        self.accurate_del_or_modify(AccurateKind::Modify, record)
    }
}

fn validate_bulk_add(record: &FeatureRecord) -> Result<()> {
    if record.offset() != 0 {
        return Err(FvError::invalid(
            "offset",
            format!("N:M repo add requires offset 0, got {}", record.offset()),
        ));
    }
    if record.feature_count() == 0 {
        return Err(FvError::invalid("featureCount", "N:M repo add needs at least one feature"));
    }
    let expected = u64::from(record.feature_len()) * u64::from(record.feature_count());
    if expected != u64::from(record.data_len()) {
        return Err(FvError::invalid(
            "featureDataLen",
            format!(
                "featureLen * featureCount = {expected} != featureDataLen {}",
                record.data_len()
            ),
        ));
    }
    Ok(())
}
