use std::convert::Infallible;

use bytes::Bytes;
use formpost::{MultipartBody, Param, UploadBody};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};

// A handler for incoming requests: drain the body and report how many bytes
// arrived.
async fn handle(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let declared = req
        .headers()
        .get(hyper::header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_owned())
        .unwrap_or_default();

    let received = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes().len(),
        Err(_) => 0,
    };

    let reply = format!("declared {} bytes, received {} bytes", declared, received);
    Ok(Response::new(Full::from(reply)))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Spin up a local server to receive the upload.
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => return,
            };

            tokio::spawn(async move {
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service_fn(handle))
                    .await;
            });
        }
    });

    // A file field next to two plain fields; the file is streamed from disk
    // in bounded chunks.
    let path = std::env::temp_dir().join("formpost_demo_upload.txt");
    std::fs::write(&path, b"some file contents worth uploading")?;

    let params = vec![
        Param::text("title", "My Document"),
        Param::text("note", "uploaded with formpost"),
        Param::from_file("file", &path).await?,
    ];

    let body = MultipartBody::new(params)
        .await?
        .progress(|field, sent, total| {
            println!("progress: field {:?}, {}/{} bytes", field, sent, total);
        });

    println!("request headers: {:?}", body.headers());

    let mut request = formpost::upload_request(
        http::Method::POST,
        format!("http://{}/upload", addr),
        UploadBody::from(body),
    )?;
    request
        .headers_mut()
        .insert(hyper::header::HOST, addr.to_string().parse()?);

    // Drive the upload over a plain HTTP/1 connection.
    let stream = TcpStream::connect(addr).await?;
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
    tokio::spawn(conn);

    let response = sender.send_request(request).await?;
    let reply = response.into_body().collect().await?.to_bytes();
    println!("server said: {}", String::from_utf8_lossy(&reply));

    let _ = std::fs::remove_file(&path);
    Ok(())
}
