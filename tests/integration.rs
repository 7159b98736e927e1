use std::convert::Infallible;

use bytes::Bytes;
use formpost::{ByteSource, Error, MultipartBody, Param, ParamValue, UploadBody};
use futures_util::io::AsyncReadExt;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};

fn unix2dos(s: &str) -> String {
    s.replace('\n', "\r\n")
}

async fn collect(body: &mut MultipartBody) -> Vec<u8> {
    let mut out = Vec::new();

    while let Some(chunk) = body.next_chunk().await.unwrap() {
        out.extend_from_slice(&chunk);
    }

    out
}

#[tokio::test]
async fn test_single_text_param() {
    let params = Param::from_params(vec![("foo", "bar")]);
    let mut body = MultipartBody::with_boundary(params, "XYZXYZXYZ").await.unwrap();

    let expected = unix2dos(
        "--XYZXYZXYZ\nContent-Disposition: form-data; name=\"foo\"\nContent-Type: text/plain; charset=utf-8\nContent-Length: 3\n\nbar\n--XYZXYZXYZ--\n",
    );

    assert_eq!(body.size(), expected.len() as u64);
    assert_eq!(body.content_type(), "multipart/form-data; boundary=XYZXYZXYZ");

    let headers = body.headers();
    assert_eq!(headers[CONTENT_TYPE], "multipart/form-data; boundary=XYZXYZXYZ");
    assert_eq!(headers[CONTENT_LENGTH].to_str().unwrap(), expected.len().to_string());

    let encoded = collect(&mut body).await;
    assert_eq!(encoded, expected.as_bytes());

    // The sequence is one-shot: once drained it only reports completion.
    assert!(body.next_chunk().await.unwrap().is_none());
}

#[tokio::test]
async fn test_name_and_boundary_quoting() {
    let params = Param::from_params(vec![("foo baz", "bar")]);
    let mut body = MultipartBody::with_boundary(params, "ABC DEF").await.unwrap();

    assert_eq!(body.boundary(), "ABC+DEF");

    let encoded = collect(&mut body).await;
    let text = String::from_utf8(encoded).unwrap();
    assert!(text.starts_with("--ABC+DEF\r\n"));
    assert!(text.contains("name=\"foo+baz\""));
    assert!(text.ends_with("--ABC+DEF--\r\n"));
}

#[tokio::test]
async fn test_unicode_value_length() {
    let params = Param::from_params(vec![("foo", "bár")]);
    let mut body = MultipartBody::with_boundary(params, "XXXXXXXXX").await.unwrap();

    let encoded = collect(&mut body).await;
    let text = String::from_utf8(encoded.clone()).unwrap();
    assert!(text.contains("Content-Length: 4"));
    assert_eq!(body.size(), encoded.len() as u64);
}

#[tokio::test]
async fn test_duplicate_names_preserved_in_order() {
    let params = Param::from_params(vec![("key", "value1"), ("key", "value2")]);
    let mut body = MultipartBody::with_boundary(params, "XYZXYZXYZ").await.unwrap();

    let expected = unix2dos(
        "--XYZXYZXYZ\nContent-Disposition: form-data; name=\"key\"\nContent-Type: text/plain; charset=utf-8\nContent-Length: 6\n\nvalue1\n--XYZXYZXYZ\nContent-Disposition: form-data; name=\"key\"\nContent-Type: text/plain; charset=utf-8\nContent-Length: 6\n\nvalue2\n--XYZXYZXYZ--\n",
    );

    let encoded = collect(&mut body).await;
    assert_eq!(encoded, expected.as_bytes());
}

#[tokio::test]
async fn test_memory_source_param() {
    let params = Param::from_params(vec![("foo", ParamValue::from(ByteSource::from_bytes("file data")))]);
    let mut body = MultipartBody::with_boundary(params, "XYZXYZXYZ").await.unwrap();

    let expected = unix2dos(
        "--XYZXYZXYZ\nContent-Disposition: form-data; name=\"foo\"\nContent-Type: text/plain; charset=utf-8\nContent-Length: 9\n\nfile data\n--XYZXYZXYZ--\n",
    );

    let encoded = collect(&mut body).await;
    assert_eq!(encoded, expected.as_bytes());
}

#[tokio::test]
async fn test_filename_rendering() {
    let snowman = Param::source("file", ByteSource::from_bytes("abc")).filename("☃.txt");
    let quoted = Param::source("file", ByteSource::from_bytes("abc")).filename("test\"file.txt");

    let mut body = MultipartBody::with_boundary(vec![snowman, quoted], "XXXXXXXXX")
        .await
        .unwrap();
    let encoded = collect(&mut body).await;
    let text = String::from_utf8(encoded).unwrap();

    assert!(text.contains("; filename=\"&#9731;.txt\""));
    assert!(text.contains("; filename=\"test\\\"file.txt\""));
    assert!(text.is_ascii());
}

#[tokio::test]
async fn test_size_matches_emission_for_mixed_params() {
    let source = ByteSource::from_seekable(futures_util::io::Cursor::new(vec![0x5au8; 100_000]));
    let params = vec![
        Param::text("alpha", "first value"),
        Param::source("blob", source)
            .filename("blob.bin")
            .content_type(mime::APPLICATION_OCTET_STREAM),
        Param::text("omega", "last value"),
    ];

    let mut body = MultipartBody::with_boundary(params, "X-BOUNDARY")
        .await
        .unwrap()
        .chunk_size(7 * 1024);
    let total = body.size();

    let mut emitted = 0u64;
    let mut chunks = 0usize;
    while let Some(chunk) = body.next_chunk().await.unwrap() {
        assert!(chunk.len() <= 7 * 1024);
        emitted += chunk.len() as u64;
        chunks += 1;
    }

    assert_eq!(emitted, total);
    assert!(chunks > 15);
}

#[tokio::test]
async fn test_standalone_size_calculator_matches_stream() {
    let mut params = vec![
        Param::text("alpha", "first value"),
        Param::source("blob", ByteSource::from_bytes(vec![1u8; 4096])).filename("blob.bin"),
    ];

    let total = formpost::encoded_size(&mut params, "X-BOUNDARY").await.unwrap();
    let headers = formpost::encode_headers(&mut params, "X-BOUNDARY").await.unwrap();
    assert_eq!(headers[CONTENT_LENGTH].to_str().unwrap(), total.to_string());

    let mut body = MultipartBody::with_boundary(params, "X-BOUNDARY").await.unwrap();
    assert_eq!(body.size(), total);

    let encoded = collect(&mut body).await;
    assert_eq!(encoded.len() as u64, total);
}

#[tokio::test]
async fn test_unknown_length_fails_before_any_chunk() {
    let source = ByteSource::from_reader(futures_util::io::repeat(b'x').take(10));
    let params = vec![Param::source("file", source)];

    let err = MultipartBody::with_boundary(params, "X-BOUNDARY").await.unwrap_err();
    match err {
        Error::LengthUnknown { field_name } => assert_eq!(field_name.as_deref(), Some("file")),
        other => panic!("expected LengthUnknown, got {:?}", other),
    }

    let mut params = vec![Param::source(
        "file",
        ByteSource::from_reader(futures_util::io::repeat(b'x').take(10)),
    )];
    let err = formpost::encode_headers(&mut params, "X-BOUNDARY").await.unwrap_err();
    assert!(matches!(err, Error::LengthUnknown { .. }));
}

#[tokio::test]
async fn test_declared_length_allows_plain_reader() {
    let source = ByteSource::from_reader(futures_util::io::repeat(b'x').take(10)).with_length(10);
    let params = vec![Param::source("file", source)];

    let mut body = MultipartBody::with_boundary(params, "X-BOUNDARY").await.unwrap();
    let total = body.size();
    let encoded = collect(&mut body).await;

    assert_eq!(encoded.len() as u64, total);
    let text = String::from_utf8(encoded).unwrap();
    assert!(text.contains("xxxxxxxxxx\r\n--X-BOUNDARY--\r\n"));
}

#[tokio::test]
async fn test_truncated_source_fails_mid_stream() {
    let source = ByteSource::from_reader(futures_util::io::Cursor::new(b"hi".to_vec())).with_length(5);
    let params = vec![Param::source("file", source)];
    let mut body = MultipartBody::with_boundary(params, "X-BOUNDARY").await.unwrap();

    let mut failure = None;
    loop {
        match body.next_chunk().await {
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }

    match failure {
        Some(Error::IncompleteSource { field_name }) => {
            assert_eq!(field_name.as_deref(), Some("file"))
        }
        other => panic!("expected IncompleteSource, got {:?}", other),
    }
}

#[tokio::test]
async fn test_boundary_collision_detected_across_chunks() {
    let params = vec![Param::text("note", "xx--BOUNDyy")];
    let mut body = MultipartBody::with_boundary(params, "BOUND")
        .await
        .unwrap()
        .chunk_size(3);

    let mut failure = None;
    loop {
        match body.next_chunk().await {
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }

    match failure {
        Some(Error::BoundaryCollision { field_name }) => {
            assert_eq!(field_name.as_deref(), Some("note"))
        }
        other => panic!("expected BoundaryCollision, got {:?}", other),
    }
}

#[tokio::test]
async fn test_collision_check_can_be_disabled() {
    let params = vec![Param::text("note", "xx--BOUNDyy")];
    let mut body = MultipartBody::with_boundary(params, "BOUND")
        .await
        .unwrap()
        .chunk_size(3)
        .collision_check(false);

    let total = body.size();
    let encoded = collect(&mut body).await;
    assert_eq!(encoded.len() as u64, total);
}

#[tokio::test]
async fn test_empty_param_list_is_just_the_terminator() {
    let mut body = MultipartBody::with_boundary(Vec::new(), "B").await.unwrap();

    assert_eq!(body.size(), 7);
    let encoded = collect(&mut body).await;
    assert_eq!(encoded, b"--B--\r\n");
}

#[tokio::test]
async fn test_progress_callback_is_cumulative() {
    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();

    let params = vec![Param::text("alpha", "first"), Param::text("beta", "second")];
    let mut body = MultipartBody::with_boundary(params, "X-BOUNDARY")
        .await
        .unwrap()
        .progress(move |field, sent, total| {
            sink.lock().unwrap().push((field.map(str::to_owned), sent, total));
        });
    let total = body.size();

    collect(&mut body).await;

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    assert_eq!(seen[0].0.as_deref(), Some("alpha"));

    let mut last = 0u64;
    for (_, sent, reported_total) in seen.iter() {
        assert!(*sent > last);
        assert_eq!(*reported_total, total);
        last = *sent;
    }

    let (field, sent, _) = seen.last().unwrap();
    assert_eq!(field.as_deref(), None);
    assert_eq!(*sent, total);
}

#[tokio::test]
async fn test_parser_round_trip() {
    let params = vec![
        Param::text("greeting", "hello world"),
        Param::source("file", ByteSource::from_bytes(&b"binary\x00data"[..]))
            .filename("data.bin")
            .content_type(mime::APPLICATION_OCTET_STREAM),
    ];

    let body = MultipartBody::new(params).await.unwrap();
    let boundary = body.boundary().to_owned();
    let mut multipart = multer::Multipart::new(body, boundary);

    let field = multipart.next_field().await.unwrap().unwrap();
    assert_eq!(field.name(), Some("greeting"));
    assert_eq!(field.text().await.unwrap(), "hello world");

    let field = multipart.next_field().await.unwrap().unwrap();
    assert_eq!(field.name(), Some("file"));
    assert_eq!(field.file_name(), Some("data.bin"));
    assert_eq!(field.content_type(), Some(&mime::APPLICATION_OCTET_STREAM));
    assert_eq!(&field.bytes().await.unwrap()[..], b"binary\x00data");

    assert!(multipart.next_field().await.unwrap().is_none());
}

async fn echo(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let declared = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_owned())
        .unwrap_or_default();

    let collected = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => Bytes::new(),
    };

    let response = Response::builder()
        .header("x-declared-length", declared)
        .body(Full::new(collected))
        .unwrap();

    Ok(response)
}

#[tokio::test]
async fn test_hyper_upload_end_to_end() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let _ = hyper::server::conn::http1::Builder::new()
            .serve_connection(TokioIo::new(stream), service_fn(echo))
            .await;
    });

    let reference = Param::from_params(vec![("greeting", "hello world"), ("key", "value2")]);
    let mut reference_body = MultipartBody::with_boundary(reference, "X-BOUNDARY").await.unwrap();
    let expected = collect(&mut reference_body).await;

    let params = Param::from_params(vec![("greeting", "hello world"), ("key", "value2")]);
    let body = MultipartBody::with_boundary(params, "X-BOUNDARY").await.unwrap();
    let total = body.size();

    let stream = TcpStream::connect(addr).await.unwrap();
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .unwrap();
    tokio::spawn(conn);

    let mut request = formpost::upload_request(
        http::Method::POST,
        format!("http://{}/upload", addr),
        UploadBody::from(body),
    )
    .unwrap();
    request
        .headers_mut()
        .insert(http::header::HOST, addr.to_string().parse().unwrap());

    let response = sender.send_request(request).await.unwrap();
    assert_eq!(
        response.headers()["x-declared-length"].to_str().unwrap(),
        total.to_string()
    );

    let echoed = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&echoed[..], &expected[..]);
}

#[cfg(feature = "tokio-io")]
#[tokio::test]
async fn test_from_file_param() {
    let path = std::env::temp_dir().join("formpost_integration_upload.txt");
    std::fs::write(&path, b"file contents for the upload test").unwrap();

    let param = Param::from_file("file", &path).await.unwrap();
    assert_eq!(param.file_name(), Some("formpost_integration_upload.txt"));

    let mut body = MultipartBody::with_boundary(vec![param], "X-BOUNDARY").await.unwrap();
    let total = body.size();
    let encoded = collect(&mut body).await;

    assert_eq!(encoded.len() as u64, total);
    let text = String::from_utf8(encoded).unwrap();
    assert!(text.contains("Content-Type: text/plain"));
    assert!(text.contains("file contents for the upload test\r\n"));

    let _ = std::fs::remove_file(&path);
}
