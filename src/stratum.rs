use super::*;

use error::{HexSnafu, InvalidLengthSnafu};
use snafu::ResultExt;

mod authorize;
mod error;
mod job_params;
mod login;
mod message;
mod nonce;
mod share_target;
mod submit;
mod subscribe;
mod username;

pub use {
    authorize::Authorize,
    error::{ErrorReply, ProtocolError, StratumError},
    job_params::JobParams,
    login::{Login, LoginResult},
    message::{Id, Message},
    nonce::Nonce,
    share_target::ShareTarget,
    submit::Submit,
    subscribe::{Subscribe, SubscribeResult},
    username::Username,
};
