//! Sale controller for the Aviary collection drop.
//!
//! Issuance is gated three ways: by the sale stage the administrator has
//! opened, by an exact-match payment of `price * quantity`, and by the
//! supply and per-wallet caps. During the allowlist stage a wallet must
//! additionally present a secp256k1 signature over its own address digest,
//! produced off-line by the configured signing key.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

use alloc::{format, string::String};
use codec::{Decode, DecodeWithMemTracking, Encode, MaxEncodedLen};
use frame_support::{
    dispatch::DispatchResult,
    ensure,
    pallet_prelude::*,
    traits::{Currency, ExistenceRequirement, Get},
    PalletId,
};
use frame_system::{ensure_signed, pallet_prelude::*};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sp_io::{crypto::secp256k1_ecdsa_recover, hashing::keccak_256};
use sp_runtime::{
    traits::{AccountIdConversion, CheckedMul},
    ArithmeticError, DispatchError,
};
use sp_std::prelude::*;

pub use pallet::*;

#[cfg(test)]
mod mock;


#[cfg(feature = "runtime-benchmarks")]
mod benchmarking;

/// The current storage version.
const STORAGE_VERSION: StorageVersion = StorageVersion::new(1);

type BalanceOf<T> =
    <<T as Config>::Currency as Currency<<T as frame_system::Config>::AccountId>>::Balance;

pub trait WeightInfo {
    fn set_stage() -> Weight;
    fn set_allowlist_signer() -> Weight;
    fn set_price() -> Weight;
    fn set_admin() -> Weight;
    fn mint_public() -> Weight;
    fn mint_allowlist() -> Weight;
    fn withdraw() -> Weight;
}

impl WeightInfo for () {
    fn set_stage() -> Weight {
        Weight::from_parts(10_000, 0)
    }
    fn set_allowlist_signer() -> Weight {
        Weight::from_parts(10_000, 0)
    }
    fn set_price() -> Weight {
        Weight::from_parts(10_000, 0)
    }
    fn set_admin() -> Weight {
        Weight::from_parts(10_000, 0)
    }
    fn mint_public() -> Weight {
        Weight::from_parts(50_000, 0)
    }
    fn mint_allowlist() -> Weight {
        Weight::from_parts(100_000, 0)
    }
    fn withdraw() -> Weight {
        Weight::from_parts(50_000, 0)
    }
}

/// Phase of the drop. The administrator may move between any two stages,
/// in any order, including re-entering the current one.
#[derive(
    Encode,
    Decode,
    DecodeWithMemTracking,
    Clone,
    Copy,
    Eq,
    PartialEq,
    Default,
    RuntimeDebug,
    TypeInfo,
    MaxEncodedLen,
)]
pub enum SaleStage {
    /// No minting path is open.
    #[default]
    Closed,
    /// Only signature-authorized wallets may mint.
    AllowlistOnly,
    /// The sale is suspended.
    Paused,
    /// Anyone may mint.
    PublicOpen,
}

/// An Ethereum address (i.e. 20 bytes, used to identify the allowlist signer).
///
/// This gets serialized to the 0x-prefixed hex representation.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    Encode,
    Decode,
    DecodeWithMemTracking,
    Default,
    RuntimeDebug,
    TypeInfo,
    MaxEncodedLen,
)]
pub struct EthereumAddress(pub [u8; 20]);

impl Serialize for EthereumAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

impl<'de> Deserialize<'de> for EthereumAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let base_string = String::deserialize(deserializer)?;
        let s = base_string.strip_prefix("0x").unwrap_or(&base_string);
        if s.len() != 40 {
            return Err(serde::de::Error::custom(
                "Bad length of Ethereum address (should be 42 including '0x')",
            ));
        }
        let raw = hex::decode(s).map_err(|e| serde::de::Error::custom(format!("{:?}", e)))?;
        let mut r = Self::default();
        r.0.copy_from_slice(&raw);
        Ok(r)
    }
}

/// A 65-byte recoverable secp256k1 signature, `r ‖ s ‖ v`.
#[derive(Encode, Decode, DecodeWithMemTracking, Clone, TypeInfo, MaxEncodedLen)]
pub struct EcdsaSignature(pub [u8; 65]);

impl PartialEq for EcdsaSignature {
    fn eq(&self, other: &Self) -> bool {
        &self.0[..] == &other.0[..]
    }
}

impl core::fmt::Debug for EcdsaSignature {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "EcdsaSignature({:?})", &self.0[..])
    }
}

#[frame_support::pallet]
pub mod pallet {
    use super::*;

    #[pallet::config]
    pub trait Config: frame_system::Config {
        /// The overarching event type.
        type RuntimeEvent: From<Event<Self>> + IsType<<Self as frame_system::Config>::RuntimeEvent>;

        /// The currency in which mint payments are settled.
        type Currency: Currency<Self::AccountId>;

        /// Identifier deriving the account under which sale proceeds
        /// accumulate until withdrawn.
        #[pallet::constant]
        type PalletId: Get<PalletId>;

        /// Hard cap on the number of units this controller will ever issue.
        #[pallet::constant]
        type MaxSupply: Get<u32>;

        /// Cap on the cumulative units any single wallet may acquire.
        #[pallet::constant]
        type MaxPerWallet: Get<u32>;

        type WeightInfo: WeightInfo;
    }

    #[pallet::pallet]
    #[pallet::storage_version(STORAGE_VERSION)]
    pub struct Pallet<T>(_);

    /// The administrator account. All `set_*` calls and `withdraw` are
    /// restricted to it.
    #[pallet::storage]
    #[pallet::getter(fn admin)]
    pub type Admin<T: Config> = StorageValue<_, T::AccountId, OptionQuery>;

    /// Current phase of the drop.
    #[pallet::storage]
    #[pallet::getter(fn stage)]
    pub type Stage<T> = StorageValue<_, SaleStage, ValueQuery>;

    /// Address whose signatures authorize allowlist mints. A signature is
    /// only ever checked against the value stored here at call time, so
    /// replacing it immediately invalidates signatures from the old key.
    #[pallet::storage]
    #[pallet::getter(fn allowlist_signer)]
    pub type AllowlistSigner<T> = StorageValue<_, EthereumAddress, OptionQuery>;

    /// Unit price in the smallest balance denomination.
    #[pallet::storage]
    #[pallet::getter(fn price)]
    pub type Price<T: Config> = StorageValue<_, BalanceOf<T>, ValueQuery>;

    /// Units issued so far, across all wallets.
    #[pallet::storage]
    #[pallet::getter(fn total_issued)]
    pub type TotalIssued<T> = StorageValue<_, u32, ValueQuery>;

    /// Cumulative units issued to each wallet. Never decremented.
    #[pallet::storage]
    #[pallet::getter(fn allocation_of)]
    pub type Allocations<T: Config> =
        StorageMap<_, Blake2_128Concat, T::AccountId, u32, ValueQuery>;

    /// Owner of each issued unit. Ids are assigned sequentially from 1.
    #[pallet::storage]
    #[pallet::getter(fn owner_of)]
    pub type Owners<T: Config> = StorageMap<_, Blake2_128Concat, u32, T::AccountId, OptionQuery>;

    #[pallet::event]
    #[pallet::generate_deposit(pub(super) fn deposit_event)]
    pub enum Event<T: Config> {
        /// The sale moved to a new stage.
        StageChanged { stage: SaleStage },
        /// The allowlist signing key was replaced.
        AllowlistSignerChanged { signer: EthereumAddress },
        /// The unit price was updated.
        PriceChanged { price: BalanceOf<T> },
        /// The administrator account was replaced.
        AdminChanged { old_admin: Option<T::AccountId>, new_admin: T::AccountId },
        /// Units were issued to a wallet.
        Minted { who: T::AccountId, quantity: u32, first_id: u32 },
        /// Accumulated sale proceeds were paid out to the administrator.
        Withdrawn { to: T::AccountId, amount: BalanceOf<T> },
    }

    #[pallet::error]
    pub enum Error<T> {
        /// The caller is not the administrator.
        Unauthorized,
        /// The current sale stage does not permit this mint path.
        StageNotStartedYet,
        /// The requested quantity must be a positive number of units.
        InvalidQuantity,
        /// Issuing the requested quantity would exceed the maximum supply.
        SoldOut,
        /// Issuing the requested quantity would exceed the wallet's allowance.
        OutOfAllowance,
        /// The signature was not produced by the configured allowlist signer.
        InvalidSigner,
        /// The signature bytes could not be parsed or recovered from.
        MalformedSignature,
        /// The attached payment does not equal price times quantity.
        IncorrectValue,
    }

    #[pallet::call]
    impl<T: Config> Pallet<T> {
        /// Move the sale to `stage`. Any stage is reachable from any stage;
        /// no transition legality is enforced.
        #[pallet::call_index(0)]
        #[pallet::weight(T::WeightInfo::set_stage())]
        pub fn set_stage(origin: OriginFor<T>, stage: SaleStage) -> DispatchResult {
            Self::ensure_admin(origin)?;
            Stage::<T>::put(stage);
            log::debug!(target: "runtime::aviary-mint", "sale stage set to {:?}", stage);
            Self::deposit_event(Event::StageChanged { stage });
            Ok(())
        }

        /// Replace the allowlist signing key. Outstanding signatures from
        /// the previous key stop being accepted at once.
        #[pallet::call_index(1)]
        #[pallet::weight(T::WeightInfo::set_allowlist_signer())]
        pub fn set_allowlist_signer(
            origin: OriginFor<T>,
            signer: EthereumAddress,
        ) -> DispatchResult {
            Self::ensure_admin(origin)?;
            AllowlistSigner::<T>::put(signer);
            Self::deposit_event(Event::AllowlistSignerChanged { signer });
            Ok(())
        }

        /// Set the unit price. Applies to subsequent mints only.
        #[pallet::call_index(2)]
        #[pallet::weight(T::WeightInfo::set_price())]
        pub fn set_price(origin: OriginFor<T>, price: BalanceOf<T>) -> DispatchResult {
            Self::ensure_admin(origin)?;
            Price::<T>::put(price);
            Self::deposit_event(Event::PriceChanged { price });
            Ok(())
        }

        /// Hand the administrator role to `new_admin`.
        #[pallet::call_index(3)]
        #[pallet::weight(T::WeightInfo::set_admin())]
        pub fn set_admin(origin: OriginFor<T>, new_admin: T::AccountId) -> DispatchResult {
            Self::ensure_admin(origin)?;
            let old_admin = Admin::<T>::get();
            Admin::<T>::put(&new_admin);
            Self::deposit_event(Event::AdminChanged { old_admin, new_admin });
            Ok(())
        }

        /// Mint `quantity` units during the public stage.
        ///
        /// `payment` must equal `price() * quantity` exactly; both over- and
        /// underpayment are rejected. On success the payment moves to the
        /// sale pot and `quantity` sequential unit ids are assigned to the
        /// caller.
        ///
        /// Checks run in a fixed order: stage, then payment, then supply and
        /// per-wallet caps. A failure at any point leaves every counter and
        /// balance untouched.
        #[pallet::call_index(4)]
        #[pallet::weight(T::WeightInfo::mint_public())]
        pub fn mint_public(
            origin: OriginFor<T>,
            quantity: u32,
            payment: BalanceOf<T>,
        ) -> DispatchResult {
            let who = ensure_signed(origin)?;
            ensure!(Stage::<T>::get() == SaleStage::PublicOpen, Error::<T>::StageNotStartedYet);
            Self::validate_payment(payment, quantity)?;
            Self::commit_mint(&who, quantity, payment)
        }

        /// Mint `quantity` units during the allowlist stage.
        ///
        /// The caller must present a signature by the configured allowlist
        /// signer over their own wallet digest (see [`Pallet::signable_digest`]),
        /// or over `digest` when one is supplied explicitly. A signature is
        /// not consumed by use: the same one authorizes further mints until
        /// the wallet's allowance is exhausted.
        ///
        /// Checks run in a fixed order: stage, then signature, then payment,
        /// then supply and per-wallet caps.
        #[pallet::call_index(5)]
        #[pallet::weight(T::WeightInfo::mint_allowlist())]
        pub fn mint_allowlist(
            origin: OriginFor<T>,
            quantity: u32,
            signature: EcdsaSignature,
            digest: Option<[u8; 32]>,
            payment: BalanceOf<T>,
        ) -> DispatchResult {
            let who = ensure_signed(origin)?;
            ensure!(Stage::<T>::get() == SaleStage::AllowlistOnly, Error::<T>::StageNotStartedYet);
            Self::authorize(&who, digest, &signature)?;
            Self::validate_payment(payment, quantity)?;
            Self::commit_mint(&who, quantity, payment)
        }

        /// Sweep all accumulated sale proceeds to the administrator.
        #[pallet::call_index(6)]
        #[pallet::weight(T::WeightInfo::withdraw())]
        pub fn withdraw(origin: OriginFor<T>) -> DispatchResult {
            let admin = Self::ensure_admin(origin)?;
            let pot = Self::account_id();
            let amount = T::Currency::free_balance(&pot);
            T::Currency::transfer(&pot, &admin, amount, ExistenceRequirement::AllowDeath)?;
            Self::deposit_event(Event::Withdrawn { to: admin, amount });
            Ok(())
        }
    }

    #[pallet::genesis_config]
    #[derive(frame_support::DefaultNoBound)]
    pub struct GenesisConfig<T: Config> {
        /// Initial administrator account.
        pub admin: Option<T::AccountId>,
        /// Initial unit price.
        pub price: BalanceOf<T>,
        /// Allowlist signing key, if already known at genesis.
        pub allowlist_signer: Option<EthereumAddress>,
    }

    #[pallet::genesis_build]
    impl<T: Config> BuildGenesisConfig for GenesisConfig<T> {
        fn build(&self) {
            if let Some(ref admin) = self.admin {
                Admin::<T>::put(admin);
            }
            Price::<T>::put(self.price);
            if let Some(signer) = self.allowlist_signer {
                AllowlistSigner::<T>::put(signer);
            }
        }
    }
}

impl<T: Config> Pallet<T> {
    /// The account holding sale proceeds until withdrawal.
    pub fn account_id() -> T::AccountId {
        T::PalletId::get().into_account_truncating()
    }

    /// Hard cap on total issuance.
    pub fn max_supply() -> u32 {
        T::MaxSupply::get()
    }

    /// Cap on cumulative issuance to a single wallet.
    pub fn max_per_wallet() -> u32 {
        T::MaxPerWallet::get()
    }

    /// The digest an off-line signer commits to for `who`.
    ///
    /// This is the wire format shared with the signer tooling: the keccak-256
    /// hash of the SCALE-encoded account id, wrapped in the Ethereum
    /// `personal_sign` envelope and hashed again. Binding the digest to the
    /// wallet means one wallet's signature is useless to any other wallet.
    pub fn signable_digest(who: &T::AccountId) -> [u8; 32] {
        let seed = keccak_256(&who.encode());
        let mut message = b"\x19Ethereum Signed Message:\n32".to_vec();
        message.extend_from_slice(&seed);
        keccak_256(&message)
    }

    // Recovers the 20-byte address that signed `digest`.
    fn recover_signer(digest: &[u8; 32], signature: &EcdsaSignature) -> Option<EthereumAddress> {
        let pubkey = secp256k1_ecdsa_recover(&signature.0, digest).ok()?;
        let mut signer = EthereumAddress::default();
        signer.0.copy_from_slice(&keccak_256(&pubkey)[12..]);
        Some(signer)
    }

    // Allowlist authorization: the signature over the wallet-bound digest
    // (or the explicitly supplied one) must recover to the configured key.
    fn authorize(
        who: &T::AccountId,
        explicit_digest: Option<[u8; 32]>,
        signature: &EcdsaSignature,
    ) -> DispatchResult {
        let digest = explicit_digest.unwrap_or_else(|| Self::signable_digest(who));
        let recovered =
            Self::recover_signer(&digest, signature).ok_or(Error::<T>::MalformedSignature)?;
        let expected = AllowlistSigner::<T>::get().ok_or(Error::<T>::InvalidSigner)?;
        ensure!(recovered == expected, Error::<T>::InvalidSigner);
        Ok(())
    }

    // Exact-match payment check. The product is computed in the balance
    // width with overflow detection, never in a narrower integer.
    fn validate_payment(payment: BalanceOf<T>, quantity: u32) -> DispatchResult {
        let due = Price::<T>::get()
            .checked_mul(&quantity.into())
            .ok_or(ArithmeticError::Overflow)?;
        ensure!(payment == due, Error::<T>::IncorrectValue);
        Ok(())
    }

    // Checks both caps without writing anything, supply before per-wallet.
    // Returns the updated counters and the first unit id of the range.
    fn check_reservation(
        who: &T::AccountId,
        quantity: u32,
    ) -> Result<(u32, u32, u32), DispatchError> {
        ensure!(quantity > 0, Error::<T>::InvalidQuantity);

        let issued = TotalIssued::<T>::get();
        let new_issued = issued.checked_add(quantity).ok_or(Error::<T>::SoldOut)?;
        ensure!(new_issued <= T::MaxSupply::get(), Error::<T>::SoldOut);

        let held = Allocations::<T>::get(who);
        let new_held = held.checked_add(quantity).ok_or(Error::<T>::OutOfAllowance)?;
        ensure!(new_held <= T::MaxPerWallet::get(), Error::<T>::OutOfAllowance);

        Ok((new_issued, new_held, issued + 1))
    }

    // Shared tail of both mint paths. The reservation checks and the payment
    // transfer (the only fallible step left) both precede the first storage
    // write, so a failure anywhere leaves counters and balances untouched.
    fn commit_mint(who: &T::AccountId, quantity: u32, payment: BalanceOf<T>) -> DispatchResult {
        let (new_issued, new_held, first_id) = Self::check_reservation(who, quantity)?;
        T::Currency::transfer(
            who,
            &Self::account_id(),
            payment,
            ExistenceRequirement::KeepAlive,
        )?;
        TotalIssued::<T>::put(new_issued);
        Allocations::<T>::insert(who, new_held);
        for offset in 0..quantity {
            Owners::<T>::insert(first_id + offset, who.clone());
        }
        Self::deposit_event(Event::Minted { who: who.clone(), quantity, first_id });
        Ok(())
    }

    fn ensure_admin(origin: OriginFor<T>) -> Result<T::AccountId, DispatchError> {
        let who = ensure_signed(origin)?;
        ensure!(Admin::<T>::get().as_ref() == Some(&who), Error::<T>::Unauthorized);
        Ok(who)
    }
}

#[cfg(any(test, feature = "runtime-benchmarks"))]
pub mod secp_utils {
    use super::*;

    pub fn secret(seed: &[u8]) -> libsecp256k1::SecretKey {
        libsecp256k1::SecretKey::parse(&keccak_256(seed)).expect("keccak output is a valid key")
    }

    pub fn eth(secret: &libsecp256k1::SecretKey) -> EthereumAddress {
        let public = libsecp256k1::PublicKey::from_secret_key(secret);
        let mut res = EthereumAddress::default();
        res.0.copy_from_slice(&keccak_256(&public.serialize()[1..65])[12..]);
        res
    }

    pub fn sig_over(secret: &libsecp256k1::SecretKey, digest: &[u8; 32]) -> EcdsaSignature {
        let (sig, recovery_id) = libsecp256k1::sign(&libsecp256k1::Message::parse(digest), secret);
        let mut r = [0u8; 65];
        r[0..64].copy_from_slice(&sig.serialize()[..]);
        r[64] = recovery_id.serialize();
        EcdsaSignature(r)
    }

    pub fn sig<T: Config>(secret: &libsecp256k1::SecretKey, who: &T::AccountId) -> EcdsaSignature {
        sig_over(secret, &Pallet::<T>::signable_digest(who))
    }
}
