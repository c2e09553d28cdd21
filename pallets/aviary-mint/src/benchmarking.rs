//! Benchmarking setup for pallet-aviary-mint

use super::*;

#[allow(unused)]
use crate::Pallet as AviaryMint;
use frame_benchmarking::v2::*;
use frame_system::RawOrigin;
use sp_runtime::traits::Zero;

fn setup_admin<T: Config>() -> T::AccountId {
    let admin: T::AccountId = account("admin", 0, 0);
    Admin::<T>::put(&admin);
    admin
}

#[benchmarks]
mod benchmarks {
    use super::*;

    #[benchmark]
    fn set_stage() {
        let admin = setup_admin::<T>();

        #[extrinsic_call]
        _(RawOrigin::Signed(admin), SaleStage::PublicOpen);

        assert_eq!(Stage::<T>::get(), SaleStage::PublicOpen);
    }

    #[benchmark]
    fn set_allowlist_signer() {
        let admin = setup_admin::<T>();
        let signer = EthereumAddress([7u8; 20]);

        #[extrinsic_call]
        _(RawOrigin::Signed(admin), signer);

        assert_eq!(AllowlistSigner::<T>::get(), Some(signer));
    }

    #[benchmark]
    fn set_price() {
        let admin = setup_admin::<T>();
        let price: BalanceOf<T> = 1_000u32.into();

        #[extrinsic_call]
        _(RawOrigin::Signed(admin), price);

        assert_eq!(Price::<T>::get(), price);
    }

    #[benchmark]
    fn set_admin() {
        let admin = setup_admin::<T>();
        let new_admin: T::AccountId = account("successor", 0, 0);

        #[extrinsic_call]
        _(RawOrigin::Signed(admin), new_admin.clone());

        assert_eq!(Admin::<T>::get(), Some(new_admin));
    }

    #[benchmark]
    fn mint_public() {
        let caller: T::AccountId = whitelisted_caller();
        // A zero price keeps the benchmark independent of the currency's
        // existential deposit.
        Price::<T>::put(BalanceOf::<T>::zero());
        Stage::<T>::put(SaleStage::PublicOpen);

        #[extrinsic_call]
        _(RawOrigin::Signed(caller.clone()), 1u32, BalanceOf::<T>::zero());

        assert_eq!(Allocations::<T>::get(&caller), 1);
    }

    #[benchmark]
    fn mint_allowlist() {
        let caller: T::AccountId = whitelisted_caller();
        let secret = secp_utils::secret(b"//BenchSigner");
        AllowlistSigner::<T>::put(secp_utils::eth(&secret));
        Price::<T>::put(BalanceOf::<T>::zero());
        Stage::<T>::put(SaleStage::AllowlistOnly);
        let signature = secp_utils::sig::<T>(&secret, &caller);

        #[extrinsic_call]
        _(RawOrigin::Signed(caller.clone()), 1u32, signature, None, BalanceOf::<T>::zero());

        assert_eq!(Allocations::<T>::get(&caller), 1);
    }

    #[benchmark]
    fn withdraw() {
        let admin = setup_admin::<T>();

        #[extrinsic_call]
        _(RawOrigin::Signed(admin));

        assert_eq!(T::Currency::free_balance(&AviaryMint::<T>::account_id()), Zero::zero());
    }

    impl_benchmark_test_suite!(AviaryMint, crate::mock::new_test_ext(), crate::mock::Test);
}
