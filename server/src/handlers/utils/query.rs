use hyper::Request;
use std::collections::HashMap;

/// Parse query-string params into a `HashMap`
pub fn parse_query(req: &Request<hyper::body::Incoming>) -> HashMap<String, String> {
    form_urlencoded::parse(req.uri().query().unwrap_or("").as_bytes())
        .into_owned()
        .collect()
}
