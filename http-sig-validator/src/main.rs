use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use http::header::HeaderName;
use http_hmac_sig::mock_request::MockRequest;
use http_hmac_sig::{
    CanonicalizeConfig, HmacSha512, Nonce, NonceCache, NonceCacheConfig, RequestFields,
    SecretKey, SignatureHeaders, SigningConfig, SigningExt, TimestampWindow, VerifyingConfig,
    VerifyingExt, DEFAULT_CACHE_TTL, DEFAULT_CLOCK_SKEW,
};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
enum Mode {
    /// Print the canonical message for the request.
    Canonicalize,
    /// Sign the request and print it with the signature headers attached.
    Sign,
    /// Verify the signature headers on the request.
    Verify,
}

#[derive(Debug, StructOpt)]
#[structopt(about = "Signs and verifies HTTP requests read from stdin.")]
struct Opt {
    #[structopt(subcommand)]
    mode: Mode,

    /// The shared secret key, hex encoded.
    #[structopt(short, long, global = true)]
    key: Option<String>,

    /// A list of header names to include in the signature, optionally quoted
    #[structopt(short = "d", long, global = true)]
    headers: Option<String>,

    /// Leave the HTTP method out of the signature.
    #[structopt(long, global = true)]
    no_verb: bool,

    /// Leave the URL out of the signature.
    #[structopt(long, global = true)]
    no_url: bool,

    /// The nonce to sign with, hex encoded.
    #[structopt(short, long, global = true)]
    nonce: Option<Nonce>,

    /// The timestamp to sign with, in seconds since the Unix epoch.
    #[structopt(short, long, global = true)]
    timestamp: Option<i64>,

    /// Tolerated clock skew in seconds.
    #[structopt(long, global = true)]
    clock_skew: Option<u64>,

    /// Nonce cache TTL in seconds.
    #[structopt(long, global = true)]
    cache_ttl: Option<u64>,

    /// The verifier's current time, in seconds since the Unix epoch.
    #[structopt(long, global = true)]
    now: Option<i64>,
}

impl Opt {
    fn parse_headers(&self) -> Result<Vec<HeaderName>, Box<dyn Error>> {
        Ok(match &self.headers {
            Some(headers) => headers
                .trim_matches('"')
                .split_ascii_whitespace()
                .map(|s| s.parse::<HeaderName>().with_context(|| format!("{:?}", s)))
                .collect::<Result<_, _>>()?,
            None => Vec::new(),
        })
    }
    fn key(&self) -> Result<SecretKey, Box<dyn Error>> {
        let key = self.key.as_deref().ok_or_else(|| anyhow!("No key provided"))?;
        Ok(SecretKey::from_hex(key).context("Key must be hex encoded")?)
    }
    fn canonicalize_config(&self) -> Result<CanonicalizeConfig, Box<dyn Error>> {
        Ok(CanonicalizeConfig::new()
            .with_verb(!self.no_verb)
            .with_url(!self.no_url)
            .with_headers(self.parse_headers()?))
    }
    fn signing_config(&self) -> Result<SigningConfig, Box<dyn Error>> {
        Ok(SigningConfig::new_default(self.key()?.as_bytes())
            .with_canonicalize(self.canonicalize_config()?))
    }
    fn verification_config(&self) -> Result<VerifyingConfig, Box<dyn Error>> {
        let clock_skew = self
            .clock_skew
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CLOCK_SKEW);
        let cache_ttl = self
            .cache_ttl
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CACHE_TTL);

        let window = TimestampWindow::new(clock_skew, cache_ttl)?;
        let cache = NonceCache::new(&NonceCacheConfig::new().with_ttl(cache_ttl))?;
        let config = VerifyingConfig::new(
            HmacSha512::from(&self.key()?),
            window,
            Arc::new(cache),
        )?;

        Ok(config.with_canonicalize(self.canonicalize_config()?))
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let opt = Opt::from_args();

    let mut req = MockRequest::from_reader(&mut io::stdin().lock())?;

    log::info!("{:?}", req);

    match opt.mode {
        Mode::Canonicalize => {
            let nonce = opt.nonce.clone().ok_or_else(|| anyhow!("No nonce provided"))?;
            let timestamp = opt.timestamp.ok_or_else(|| anyhow!("No timestamp provided"))?;
            let res = opt.canonicalize_config()?.canonicalize(
                &req,
                timestamp,
                &nonce,
                req.body().unwrap_or_default(),
            )?;
            io::stdout().lock().write_all(res.as_bytes())?;
        }
        Mode::Sign => {
            let config = opt.signing_config()?;
            match (opt.nonce.clone(), opt.timestamp) {
                (Some(nonce), Some(timestamp)) => {
                    let fields = RequestFields::capture(&req, config.canonicalize().headers())
                        .with_body(req.body().unwrap_or_default());
                    let signed = config.sign_request_with(&fields, nonce, timestamp)?;
                    for (name, value) in signed.to_headers() {
                        req = req.with_header(name.as_str(), value.to_str()?);
                    }
                }
                (None, None) => req.sign(&config)?,
                _ => return Err(anyhow!("--nonce and --timestamp must be given together").into()),
            }
            req.write(&mut io::stdout().lock())?;
        }
        Mode::Verify => {
            let config = opt.verification_config()?;
            if let Some(now) = opt.now {
                let received = SignatureHeaders::from_request(&req)?;
                let fields = RequestFields::capture(&req, config.canonicalize().headers())
                    .with_body(req.body().unwrap_or_default());
                config.verify_request(
                    &fields,
                    &received.signature,
                    &received.nonce,
                    received.timestamp,
                    now,
                )?;
            } else {
                (&req)
                    .verify(&config)
                    .map_err(|rejected| anyhow!("{}", rejected.reason()))?;
            }
        }
    }

    Ok(())
}
