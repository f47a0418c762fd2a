//! Repository init and release.
//!
//! Neither kernel takes a completion signal; the host synchronizes the
//! stream instead.

use tracing::{info, info_span};
use uuid::Uuid;

use super::{check_device_result, FvRepository};
use crate::device::{DeviceMirror, Stream};
use crate::error::Result;
use crate::handles::init::{validate_capacity, validate_top_1n, validate_top_nm};
use crate::handles::InitParams;
use crate::protocol::args::{INIT_ARGS, RELEASE_ARGS};
use crate::protocol::layout::RawResultCode;

impl FvRepository {
    /// Initialize the device repository with `params`.
    pub fn init(&self, params: &mut InitParams) -> Result<()> {
        let span = info_span!("fv_init", call_id = %Uuid::new_v4());
        let _enter = span.enter();
        info!(capacity = params.capacity(), "init start");

        let ptr = params.mirror().checked_ptr("initPara")?;
        let run_mode = self.run_mode()?;
        let stream = Stream::create(&*self.runtime)?;

        let mut args = INIT_ARGS.builder();
        args.push_addr(ptr)?;
        let args = args.finish()?;

        params.mirror().copy_in(&params.raw(), run_mode, &stream)?;
        self.invoker.invoke(&self.kernels.init, &args, &stream)?;
        stream.synchronize()?;

        let out = params.mirror().copy_out(run_mode)?;
        params.set_device_result(out.ret);
        check_device_result("init", out.ret)?;
        info!("init success");
        Ok(())
    }

    /// Validate every limit, then create parameters and initialize.
    ///
    /// Nothing is allocated unless all three values are in range.
    pub fn init_with(&self, capacity: u64, top_1n: u32, top_nm: u32) -> Result<InitParams> {
        validate_capacity(capacity)?;
        validate_top_1n(top_1n)?;
        validate_top_nm(top_nm)?;

        let mut params = InitParams::create(&self.runtime, capacity)?;
        params.set_top_1n(top_1n)?;
        params.set_top_nm(top_nm)?;
        self.init(&mut params)?;
        Ok(params)
    }

    /// Release the device repository.
    pub fn release(&self) -> Result<()> {
        let span = info_span!("fv_release", call_id = %Uuid::new_v4());
        let _enter = span.enter();
        info!("release start");

        let run_mode = self.run_mode()?;
        let stream = Stream::create(&*self.runtime)?;
        let result = DeviceMirror::<RawResultCode>::create(&self.runtime)?;
        let ptr = result.checked_ptr("retCode")?;

        let mut args = RELEASE_ARGS.builder();
        args.push_addr(ptr)?;
        let args = args.finish()?;

        result.copy_in(&RawResultCode::default(), run_mode, &stream)?;
        self.invoker.invoke(&self.kernels.release, &args, &stream)?;
        stream.synchronize()?;

        let out = result.copy_out(run_mode)?;
        check_device_result("release", out.0)?;
        info!("release success");
        Ok(())
    }
}
