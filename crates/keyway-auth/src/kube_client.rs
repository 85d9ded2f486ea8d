//! Kubernetes client construction from cluster metadata and a bearer token

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use kube::{Client, Config};

use keyway_common::{ClusterInfo, Error, Result};

use crate::token::BearerToken;

/// Connection timeout for cluster API calls
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Read timeout for cluster API calls
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a kube `Config` that authenticates with `token`
pub fn kube_config(info: &ClusterInfo, token: &BearerToken) -> Result<Config> {
    let cluster_url = info.endpoint.parse::<http::Uri>().map_err(|e| {
        Error::internal_with_context(
            "kube_client",
            format!("invalid endpoint '{}' for {}: {}", info.endpoint, info.cluster_name, e),
        )
    })?;

    let mut config = Config::new(cluster_url);
    config.root_cert = decode_ca_bundle(info.ca_data.as_deref())?;
    config.auth_info.token = Some(token.as_str().to_string().into());
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Ok(config)
}

/// Build a kube `Client` for the cluster
pub fn client_for(info: &ClusterInfo, token: &BearerToken) -> Result<Client> {
    let config = kube_config(info, token)?;
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context(
            "kube_client",
            format!("failed to create client for {}: {}", info.cluster_name, e),
        )
    })
}

/// Decode EKS `certificateAuthority.data` into DER certificates
///
/// EKS returns a base64-wrapped PEM bundle; kube wants each certificate as DER.
pub fn decode_ca_bundle(ca_data: Option<&str>) -> Result<Option<Vec<Vec<u8>>>> {
    let Some(data) = ca_data else {
        return Ok(None);
    };

    let pem_bytes = STANDARD.decode(data.trim()).map_err(|e| {
        Error::serialization(format!("certificate authority is not valid base64: {}", e))
    })?;
    let certs = pem::parse_many(&pem_bytes).map_err(|e| {
        Error::serialization(format!("certificate authority is not valid PEM: {}", e))
    })?;
    if certs.is_empty() {
        return Err(Error::serialization(
            "certificate authority contains no certificates",
        ));
    }

    Ok(Some(certs.into_iter().map(pem::Pem::into_contents).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::presign_token;
    use aws_credential_types::Credentials;
    use std::time::SystemTime;

    fn ca_data(certs: &[&[u8]]) -> String {
        let bundle: String = certs
            .iter()
            .map(|der| pem::encode(&pem::Pem::new("CERTIFICATE", der.to_vec())))
            .collect();
        STANDARD.encode(bundle)
    }

    fn token() -> BearerToken {
        let creds = Credentials::new("AKID", "SECRET", None, None, "test");
        presign_token("c1", "us-west-2", &creds, SystemTime::now()).unwrap()
    }

    #[test]
    fn test_decode_ca_bundle_multiple_certs() {
        let data = ca_data(&[b"first", b"second"]);
        let certs = decode_ca_bundle(Some(&data)).unwrap().unwrap();
        assert_eq!(certs, vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[test]
    fn test_decode_ca_bundle_absent() {
        assert_eq!(decode_ca_bundle(None).unwrap(), None);
    }

    #[test]
    fn test_decode_ca_bundle_rejects_garbage() {
        assert!(decode_ca_bundle(Some("!!not base64!!")).is_err());
        let not_pem = STANDARD.encode("hello");
        assert!(decode_ca_bundle(Some(&not_pem)).is_err());
    }

    #[test]
    fn test_kube_config_uses_token_and_timeouts() {
        let info = ClusterInfo::new(
            "c1",
            "https://abcd.gr7.us-west-2.eks.amazonaws.com",
            Some(ca_data(&[b"der"])),
        );
        let config = kube_config(&info, &token()).unwrap();

        assert_eq!(
            config.cluster_url.host(),
            Some("abcd.gr7.us-west-2.eks.amazonaws.com")
        );
        assert!(config.auth_info.token.is_some());
        assert_eq!(config.root_cert, Some(vec![b"der".to_vec()]));
        assert_eq!(config.connect_timeout, Some(DEFAULT_CONNECT_TIMEOUT));
        assert_eq!(config.read_timeout, Some(DEFAULT_READ_TIMEOUT));
    }

    #[test]
    fn test_kube_config_rejects_bad_endpoint() {
        let info = ClusterInfo::new("c1", "not a url", None);
        let err = kube_config(&info, &token()).unwrap_err();
        assert!(err.to_string().contains("invalid endpoint"));
    }
}
