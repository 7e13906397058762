//! HTTP protocol layer module: response builders and MIME lookup, shared
//! between static file serving and the render dispatch path.

pub mod mime;
pub mod response;

pub use mime::get_content_type;
pub use response::{
    build_400_response, build_403_response, build_404_response, build_429_response,
    build_500_response, build_503_response, build_504_response, build_error_response,
    build_html_response, build_json_response, build_redirect_response, build_static_response,
};
