#![no_main]

use formpost::{ByteSource, MultipartBody, Param};
use libfuzzer_sys::fuzz_target;
use tokio::runtime;

fuzz_target!(|data: &[u8]| {
    let data = data.to_vec();

    let rt = runtime::Builder::new_current_thread().build().expect("runtime");
    rt.block_on(async move {
        let params = vec![
            Param::text("text", String::from_utf8_lossy(&data).into_owned()),
            Param::source("blob", ByteSource::from_bytes(data)).filename("blob.bin"),
        ];

        let mut body = MultipartBody::with_boundary(params, "X-BOUNDARY")
            .await
            .expect("sizing in-memory params never fails")
            .collision_check(false)
            .chunk_size(97);
        let total = body.size();

        let mut emitted = 0u64;
        while let Some(chunk) = body.next_chunk().await.expect("encode") {
            emitted += chunk.len() as u64;
        }

        assert_eq!(emitted, total);
    });
});
