pub mod http_client;

pub use http_client::{
    FormPart, FormValue, HttpClient, HttpMethod, HttpRequest, MultipartForm, ReqwestHttpClient,
    RequestBody, SimpleHttpResponse,
};
