//! Dual calling convention
//!
//! Functions declaring at most one parameter are awaited for their value.
//! Functions declaring two get a completion callback as well, and race it
//! against any deferred value they return: whichever completes first settles
//! the response, the other is dropped.

use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::Response;

use super::error::InvokeError;
use super::module::{CallOutcome, Responder, UserFunction};
use super::normalize::{normalize_callback, normalize_returned};
use super::settle::Settlement;
use super::value::InvocationRequest;

type Settled = Result<Response<Full<Bytes>>, InvokeError>;

pub async fn invoke(function: &dyn UserFunction, request: InvocationRequest) -> Settled {
    if function.arity() <= 1 {
        invoke_returning(function, request).await
    } else {
        invoke_with_callback(function, request).await
    }
}

async fn invoke_returning(function: &dyn UserFunction, request: InvocationRequest) -> Settled {
    let returned = match function.call(request, None).await? {
        CallOutcome::Ready(value) => value,
        CallOutcome::Deferred(deferred) => deferred.await?,
    };
    normalize_returned(returned)
}

/// Never returns if neither path ever completes.
async fn invoke_with_callback(function: &dyn UserFunction, request: InvocationRequest) -> Settled {
    let (settlement, mut settled) = Settlement::<Settled>::new();
    let settlement = Arc::new(settlement);

    let responder = {
        let settlement = Arc::clone(&settlement);
        Responder::new(move |record| {
            settlement.settle(normalize_callback(record));
        })
    };

    match function.call(request, Some(responder)).await {
        // Plain return values are ignored under this convention.
        Ok(CallOutcome::Ready(_)) => {}
        Ok(CallOutcome::Deferred(deferred)) => {
            tokio::select! {
                biased;
                result = &mut settled => {
                    return result.unwrap_or(Err(InvokeError::HostUnavailable));
                }
                resolved = deferred => match resolved {
                    Ok(value) if value.is_undefined() => {}
                    Ok(value) => {
                        settlement.settle(normalize_returned(value));
                    }
                    Err(e) => {
                        settlement.settle(Err(e));
                    }
                },
            }
        }
        Err(thrown) => {
            settlement.settle(Err(thrown));
        }
    }

    settled.await.unwrap_or(Err(InvokeError::HostUnavailable))
}
