use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use common::storage::types::user::User;

use crate::{api_state::ApiState, error::ApiError};

/// The resolved caller. Requests without a valid bearer token bind to the
/// anonymous principal, which holds no namespace and no group memberships.
#[derive(Clone, Debug)]
pub enum Principal {
    User(User),
    Anonymous,
}

impl Principal {
    /// The typed principal string the policy engine consumes.
    pub fn as_subject(&self) -> String {
        match self {
            Principal::User(user) => user.principal(),
            Principal::Anonymous => "anonymous".to_string(),
        }
    }

    pub fn require_user(&self) -> Result<&User, ApiError> {
        match self {
            Principal::User(user) => Ok(user),
            Principal::Anonymous => Err(ApiError::Unauthorized(
                "You have to be authenticated".to_string(),
            )),
        }
    }

    pub fn require_admin(&self) -> Result<&User, ApiError> {
        let user = self.require_user()?;
        if !user.admin {
            return Err(ApiError::Forbidden {
                reason: "administrator access required".to_string(),
                matched_policy_id: None,
            });
        }
        Ok(user)
    }
}

pub async fn resolve_principal(
    State(state): State<ApiState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let principal = match extract_bearer_token(&request) {
        Some(token) => match User::find_by_api_key(&token, &state.db).await? {
            Some(user) => Principal::User(user),
            None => Principal::Anonymous,
        },
        None => Principal::Anonymous,
    };

    request.extensions_mut().insert(principal);

    Ok(next.run(request).await)
}

fn extract_bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer ").map(str::trim))
        .filter(|token| !token.is_empty())
        .map(String::from)
}
