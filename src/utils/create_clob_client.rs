use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer as _;
use anyhow::{anyhow, Result};
use polymarket_client_sdk::auth::state::Authenticated;
use polymarket_client_sdk::auth::Normal;
use polymarket_client_sdk::clob::types::SignatureType;
use polymarket_client_sdk::clob::Client as ClobClient;
use std::str::FromStr;

use crate::config::Env;
use crate::utils::logger::Logger;

pub fn signature_type(code: u8) -> Result<SignatureType> {
    match code {
        0 => Ok(SignatureType::Eoa),
        1 => Ok(SignatureType::Proxy),
        2 => Ok(SignatureType::GnosisSafe),
        other => Err(anyhow!("unsupported signature type {}", other)),
    }
}

fn signature_label(code: u8) -> &'static str {
    match code {
        0 => "EOA",
        1 => "Polymarket proxy",
        _ => "Gnosis Safe",
    }
}

pub fn build_signer(private_key: &str, chain_id: u64) -> Result<PrivateKeySigner> {
    let key = if private_key.starts_with("0x") {
        private_key.to_string()
    } else {
        format!("0x{}", private_key)
    };
    let signer = PrivateKeySigner::from_str(&key)
        .map_err(|e| anyhow!("Invalid private key: {}", e))?
        .with_chain_id(Some(chain_id));
    Ok(signer)
}

/// Authenticated CLOB client plus the signer orders are signed with.
pub async fn create_clob_client(env: &Env) -> Result<(ClobClient<Authenticated<Normal>>, PrivateKeySigner)> {
    let private_key = env
        .private_key
        .as_deref()
        .ok_or_else(|| anyhow!("PRIVATE_KEY is required to place live orders"))?;
    let signer = build_signer(private_key, env.chain_id)?;

    Logger::info(&format!(
        "Authenticating with CLOB at {} ({} signature, funder {})",
        env.clob_http_url,
        signature_label(env.signature_type),
        Logger::format_address(&env.funder_address)
    ));

    let client = ClobClient::new(&env.clob_http_url, Default::default())?;
    let authenticated = match signature_type(env.signature_type)? {
        SignatureType::Eoa => client.authentication_builder(&signer).authenticate().await?,
        proxied => {
            let funder = Address::from_str(&env.funder_address)
                .map_err(|e| anyhow!("Invalid POLY_FUNDER address: {}", e))?;
            client
                .authentication_builder(&signer)
                .funder(funder)
                .signature_type(proxied)
                .authenticate()
                .await?
        }
    };

    Ok((authenticated, signer))
}
