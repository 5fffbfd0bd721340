use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    header::{HeaderValue, CONTENT_TYPE},
    Response, StatusCode,
};
use serde::Serialize;

pub type Body = Full<Bytes>;

pub fn json_ok<T: Serialize>(value: T) -> Response<Body> {
    json_response(value, StatusCode::OK)
}

pub fn json_response<T: Serialize>(value: T, code: StatusCode) -> Response<Body> {
    match serde_json::to_vec(&value) {
        Ok(serialized) => response(code, "application/json", serialized),
        Err(err) => response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "text/plain",
            err.to_string(),
        ),
    }
}

pub fn text_response(text: impl Into<Bytes>, code: StatusCode) -> Response<Body> {
    response(code, "text/plain; charset=utf-8", text)
}

fn response(
    code: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Body> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = code;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
